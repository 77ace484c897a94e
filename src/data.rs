//! Transaction loading, filtering and RFM metric aggregation

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RfmError};

/// Timestamp layouts accepted for `order_date`, tried in order after RFC 3339
const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// A single order line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub customer_id: String,
    pub order_id: String,
    pub order_date: NaiveDateTime,
    pub sales: f64,
    pub profit: f64,
    pub category: Option<String>,
    pub state: Option<String>,
}

impl Transaction {
    pub fn new(
        customer_id: impl Into<String>,
        order_id: impl Into<String>,
        order_date: NaiveDateTime,
        sales: f64,
        profit: f64,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            order_id: order_id.into(),
            order_date,
            sales,
            profit,
            category: None,
            state: None,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Parse an order timestamp in any of the supported layouts.
///
/// Date-only values resolve to midnight. Zoned RFC 3339 values are converted to UTC.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(zoned) = DateTime::parse_from_rfc3339(value) {
        return Some(zoned.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Load a transaction CSV file.
///
/// Every column is read as text and validated row by row, so a single bad
/// timestamp or amount fails the whole load instead of being dropped.
pub fn load_transactions(path: impl AsRef<Path>) -> Result<Vec<Transaction>> {
    let path = path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    debug!(path = %path.display(), rows = df.height(), "read transaction csv");
    transactions_from_dataframe(&df)
}

/// Convert a transaction table into typed records.
///
/// Required columns: `customer_id`, `order_id`, `order_date`, `sales`, `profit`.
/// `category` and `state` are optional; empty cells become `None`.
pub fn transactions_from_dataframe(df: &DataFrame) -> Result<Vec<Transaction>> {
    let customer_ids = required_column(df, "customer_id")?;
    let order_ids = required_column(df, "order_id")?;
    let order_dates = required_column(df, "order_date")?;
    let sales_values = required_column(df, "sales")?;
    let profits = required_column(df, "profit")?;
    let categories = optional_column(df, "category")?;
    let states = optional_column(df, "state")?;

    let mut transactions = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let customer_id = customer_ids[row]
            .clone()
            .ok_or(RfmError::MissingValue { row, column: "customer_id" })?;
        let order_id = order_ids[row]
            .clone()
            .ok_or(RfmError::MissingValue { row, column: "order_id" })?;

        let raw_date = order_dates[row]
            .as_deref()
            .ok_or(RfmError::MissingValue { row, column: "order_date" })?;
        let order_date = parse_timestamp(raw_date).ok_or_else(|| RfmError::InvalidTimestamp {
            row,
            value: raw_date.to_string(),
        })?;

        let sales = parse_amount(row, "sales", sales_values[row].as_deref())?;
        if sales < 0.0 {
            return Err(RfmError::NegativeSales { row, value: sales });
        }
        let profit = parse_amount(row, "profit", profits[row].as_deref())?;

        transactions.push(Transaction {
            customer_id,
            order_id,
            order_date,
            sales,
            profit,
            category: categories.as_ref().and_then(|c| c[row].clone()),
            state: states.as_ref().and_then(|s| s[row].clone()),
        });
    }

    Ok(transactions)
}

fn required_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    optional_column(df, name)?.ok_or_else(|| RfmError::MissingColumn(name.to_string()))
}

fn optional_column(df: &DataFrame, name: &str) -> Result<Option<Vec<Option<String>>>> {
    let Ok(series) = df.column(name) else {
        return Ok(None);
    };
    let text = series.cast(&DataType::String)?;
    let values = text
        .str()?
        .into_iter()
        .map(|value| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        })
        .collect();
    Ok(Some(values))
}

fn parse_amount(row: usize, column: &'static str, value: Option<&str>) -> Result<f64> {
    let value = value.ok_or(RfmError::MissingValue { row, column })?;
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| RfmError::InvalidNumber {
            row,
            column,
            value: value.to_string(),
        })
}

/// Inclusive calendar-date window applied before aggregation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl TransactionFilter {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Self> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(RfmError::InvalidDateRange { from, to });
            }
        }
        Ok(Self { from, to })
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        let date = transaction.order_date.date();
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }

    pub fn apply<'a>(
        &'a self,
        transactions: &'a [Transaction],
    ) -> impl Iterator<Item = &'a Transaction> + 'a {
        transactions.iter().filter(move |tx| self.matches(tx))
    }
}

/// Raw RFM metrics for one customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerMetrics {
    pub customer_id: String,
    /// Whole days between the reference date and the customer's latest order
    pub recency: i64,
    /// Distinct orders
    pub frequency: usize,
    pub monetary: f64,
    pub profit: f64,
    pub last_order: NaiveDateTime,
    pub state: Option<String>,
}

/// Aggregated metrics for every customer in a transaction window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RfmData {
    /// Latest order timestamp across the whole window, `None` when it was empty
    pub reference_date: Option<NaiveDateTime>,
    /// One row per customer, ordered by `customer_id`
    pub customers: Vec<CustomerMetrics>,
}

impl RfmData {
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn recency_values(&self) -> Vec<f64> {
        self.customers.iter().map(|c| c.recency as f64).collect()
    }

    pub fn frequency_values(&self) -> Vec<f64> {
        self.customers.iter().map(|c| c.frequency as f64).collect()
    }

    pub fn monetary_values(&self) -> Vec<f64> {
        self.customers.iter().map(|c| c.monetary).collect()
    }
}

struct CustomerAccumulator<'a> {
    last_order: NaiveDateTime,
    orders: HashSet<&'a str>,
    monetary: f64,
    profit: f64,
    state: Option<&'a str>,
}

impl<'a> CustomerAccumulator<'a> {
    fn new(first_order: NaiveDateTime) -> Self {
        Self {
            last_order: first_order,
            orders: HashSet::new(),
            monetary: 0.0,
            profit: 0.0,
            state: None,
        }
    }

    fn observe(&mut self, tx: &'a Transaction) {
        self.last_order = self.last_order.max(tx.order_date);
        self.orders.insert(tx.order_id.as_str());
        self.monetary += tx.sales;
        self.profit += tx.profit;
        // first observed state wins
        if self.state.is_none() {
            self.state = tx.state.as_deref();
        }
    }
}

/// Collapse order lines into one metrics row per customer.
///
/// Runs in a single pass, so callers can feed a filtered iterator directly.
/// The reference date is the latest order across all input rows, never per customer.
pub fn aggregate<'a, I>(transactions: I) -> RfmData
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut customers: BTreeMap<&'a str, CustomerAccumulator<'a>> = BTreeMap::new();
    let mut reference_date: Option<NaiveDateTime> = None;
    let mut rows = 0usize;

    for tx in transactions {
        rows += 1;
        reference_date = Some(reference_date.map_or(tx.order_date, |d| d.max(tx.order_date)));
        customers
            .entry(tx.customer_id.as_str())
            .or_insert_with(|| CustomerAccumulator::new(tx.order_date))
            .observe(tx);
    }

    let Some(reference) = reference_date else {
        debug!("no transactions to aggregate");
        return RfmData::default();
    };

    let customers: Vec<CustomerMetrics> = customers
        .into_iter()
        .map(|(customer_id, acc)| CustomerMetrics {
            customer_id: customer_id.to_string(),
            recency: (reference - acc.last_order).num_days(),
            frequency: acc.orders.len(),
            monetary: acc.monetary,
            profit: acc.profit,
            last_order: acc.last_order,
            state: acc.state.map(str::to_owned),
        })
        .collect();

    debug!(
        rows,
        customers = customers.len(),
        reference_date = %reference,
        "aggregated customer metrics"
    );

    RfmData {
        reference_date: Some(reference),
        customers,
    }
}
