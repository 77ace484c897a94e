//! Segment summaries, dashboard views and tabular export

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::Datelike;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::Transaction;
use crate::error::Result;
use crate::model::{CustomerRfm, Segment};

/// Label used for transactions without a category
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// View-level selection applied after segmentation.
///
/// Scores are already fixed by the time this runs, so narrowing by state or
/// segment never changes another customer's quartiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerFilter {
    pub state: Option<String>,
    /// Empty selects every segment
    pub segments: Vec<Segment>,
}

impl CustomerFilter {
    pub fn matches(&self, customer: &CustomerRfm) -> bool {
        let state_matches = self
            .state
            .as_deref()
            .map_or(true, |state| customer.state.as_deref() == Some(state));
        let segment_matches = self.segments.is_empty() || self.segments.contains(&customer.segment);
        state_matches && segment_matches
    }

    pub fn apply(&self, customers: &[CustomerRfm]) -> Vec<CustomerRfm> {
        customers
            .iter()
            .filter(|customer| self.matches(customer))
            .cloned()
            .collect()
    }
}

/// Headline numbers for a transaction window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Overview {
    pub transactions: usize,
    pub customers: usize,
    pub total_sales: f64,
}

pub fn overview<'a, I>(transactions: I) -> Overview
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut customers = HashSet::new();
    let mut result = Overview::default();
    for tx in transactions {
        result.transactions += 1;
        result.total_sales += tx.sales;
        customers.insert(tx.customer_id.as_str());
    }
    result.customers = customers.len();
    result
}

/// Per-segment counts and metric means
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    #[serde(rename = "Segment")]
    pub segment: Segment,
    #[serde(rename = "Total_Customer")]
    pub customers: usize,
    #[serde(rename = "Recency")]
    pub mean_recency: f64,
    #[serde(rename = "Frequency")]
    pub mean_frequency: f64,
    #[serde(rename = "Monetary")]
    pub mean_monetary: f64,
    #[serde(rename = "Profit")]
    pub mean_profit: f64,
}

#[derive(Default)]
struct SegmentTotals {
    customers: usize,
    recency: f64,
    frequency: f64,
    monetary: f64,
    profit: f64,
}

/// One row per present segment, largest first; equal counts keep rule-table order.
pub fn segment_summary(customers: &[CustomerRfm]) -> Vec<SegmentSummary> {
    let mut totals: BTreeMap<Segment, SegmentTotals> = BTreeMap::new();
    for customer in customers {
        let entry = totals.entry(customer.segment).or_default();
        entry.customers += 1;
        entry.recency += customer.recency as f64;
        entry.frequency += customer.frequency as f64;
        entry.monetary += customer.monetary;
        entry.profit += customer.profit;
    }

    let mut summary: Vec<SegmentSummary> = totals
        .into_iter()
        .map(|(segment, t)| {
            let n = t.customers as f64;
            SegmentSummary {
                segment,
                customers: t.customers,
                mean_recency: t.recency / n,
                mean_frequency: t.frequency / n,
                mean_monetary: t.monetary / n,
                mean_profit: t.profit / n,
            }
        })
        .collect();
    summary.sort_by(|a, b| b.customers.cmp(&a.customers));
    summary
}

/// Customers per segment, largest first
pub fn segment_distribution(customers: &[CustomerRfm]) -> Vec<(Segment, usize)> {
    segment_summary(customers)
        .into_iter()
        .map(|row| (row.segment, row.customers))
        .collect()
}

/// Total profit per segment, most profitable first
pub fn profit_by_segment(customers: &[CustomerRfm]) -> Vec<(Segment, f64)> {
    let mut totals: BTreeMap<Segment, f64> = BTreeMap::new();
    for customer in customers {
        *totals.entry(customer.segment).or_default() += customer.profit;
    }
    let mut rows: Vec<(Segment, f64)> = totals.into_iter().collect();
    rows.sort_by(|a, b| b.1.total_cmp(&a.1));
    rows
}

/// Total sales per product category, by category name
pub fn sales_by_category<'a, I>(transactions: I) -> Vec<(String, f64)>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for tx in transactions {
        let category = tx.category.as_deref().unwrap_or(UNKNOWN_CATEGORY);
        *totals.entry(category).or_default() += tx.sales;
    }
    totals
        .into_iter()
        .map(|(category, sales)| (category.to_string(), sales))
        .collect()
}

/// Distinct customers ordering in one calendar month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyActivity {
    /// `YYYY-MM`
    pub month: String,
    pub customers: usize,
}

pub fn monthly_active_customers<'a, I>(transactions: I) -> Vec<MonthlyActivity>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut months: BTreeMap<(i32, u32), HashSet<&str>> = BTreeMap::new();
    for tx in transactions {
        let date = tx.order_date.date();
        months
            .entry((date.year(), date.month()))
            .or_default()
            .insert(tx.customer_id.as_str());
    }
    months
        .into_iter()
        .map(|((year, month), customers)| MonthlyActivity {
            month: format!("{year:04}-{month:02}"),
            customers: customers.len(),
        })
        .collect()
}

/// Customer table with the RFM column names
pub fn customers_to_dataframe(customers: &[CustomerRfm]) -> Result<DataFrame> {
    let df = DataFrame::new(vec![
        Series::new(
            "customer_id",
            customers.iter().map(|c| c.customer_id.as_str()).collect::<Vec<_>>(),
        ),
        Series::new("Recency", customers.iter().map(|c| c.recency).collect::<Vec<_>>()),
        Series::new(
            "Frequency",
            customers.iter().map(|c| c.frequency as u64).collect::<Vec<_>>(),
        ),
        Series::new("Monetary", customers.iter().map(|c| c.monetary).collect::<Vec<_>>()),
        Series::new("Profit", customers.iter().map(|c| c.profit).collect::<Vec<_>>()),
        Series::new("R_score", customers.iter().map(|c| c.r_score as i32).collect::<Vec<_>>()),
        Series::new("F_score", customers.iter().map(|c| c.f_score as i32).collect::<Vec<_>>()),
        Series::new("M_score", customers.iter().map(|c| c.m_score as i32).collect::<Vec<_>>()),
        Series::new(
            "RFM_Score",
            customers.iter().map(|c| c.rfm_score.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "Segment",
            customers.iter().map(|c| c.segment.label()).collect::<Vec<_>>(),
        ),
        Series::new(
            "state",
            customers.iter().map(|c| c.state.as_deref()).collect::<Vec<_>>(),
        ),
    ])?;
    Ok(df)
}

pub fn summary_to_dataframe(summary: &[SegmentSummary]) -> Result<DataFrame> {
    let df = DataFrame::new(vec![
        Series::new(
            "Segment",
            summary.iter().map(|s| s.segment.label()).collect::<Vec<_>>(),
        ),
        Series::new(
            "Total_Customer",
            summary.iter().map(|s| s.customers as u64).collect::<Vec<_>>(),
        ),
        Series::new("Recency", summary.iter().map(|s| s.mean_recency).collect::<Vec<_>>()),
        Series::new(
            "Frequency",
            summary.iter().map(|s| s.mean_frequency).collect::<Vec<_>>(),
        ),
        Series::new("Monetary", summary.iter().map(|s| s.mean_monetary).collect::<Vec<_>>()),
        Series::new("Profit", summary.iter().map(|s| s.mean_profit).collect::<Vec<_>>()),
    ])?;
    Ok(df)
}

/// Write a table as CSV with a header row
pub fn write_csv(df: &mut DataFrame, path: impl AsRef<Path>) -> Result<()> {
    write_csv_to(df, File::create(path)?)
}

pub fn write_csv_to<W: Write>(df: &mut DataFrame, writer: W) -> Result<()> {
    CsvWriter::new(writer).include_header(true).finish(df)?;
    Ok(())
}
