//! RFMForge: Customer segmentation CLI using quartile-based RFM analysis
//!
//! This is the main entrypoint that orchestrates data loading, filtering,
//! segmentation, reporting and export.

use std::io;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::Parser;
use rfmforge::{
    aggregate, customers_to_dataframe, load_transactions, monthly_active_customers, overview,
    profit_by_segment, sales_by_category, segment_customers, segment_distribution,
    segment_summary, summary_to_dataframe, write_csv, write_csv_to, Args, CustomerRfm,
    OutputFormat, Overview, SegmentSummary, Transaction,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Everything a JSON consumer needs in one document
#[derive(Serialize)]
struct JsonReport<'a> {
    overview: Overview,
    reference_date: Option<NaiveDateTime>,
    customers: &'a [CustomerRfm],
    summary: &'a [SegmentSummary],
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level());

    let start_time = Instant::now();

    let transactions = load_transactions(&args.input)
        .with_context(|| format!("failed to load transactions from {}", args.input.display()))?;
    info!(path = %args.input.display(), rows = transactions.len(), "loaded transactions");

    let filter = args.transaction_filter()?;
    let window: Vec<&Transaction> = filter.apply(&transactions).collect();
    debug!(?filter, rows = window.len(), "applied date filter");

    let rfm = aggregate(window.iter().copied());
    let customers = segment_customers(&rfm, &args.segmentation_config())
        .context("customer segmentation failed")?;
    let view = args.customer_filter().apply(&customers);
    let summary = segment_summary(&view);
    info!(
        customers = customers.len(),
        shown = view.len(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "segmentation complete"
    );

    let headline = overview(window.iter().copied());
    match args.format {
        OutputFormat::Table => {
            print_report(&args, headline, rfm.reference_date, &window, &view, &summary)?
        }
        OutputFormat::Json => {
            let report = JsonReport {
                overview: headline,
                reference_date: rfm.reference_date,
                customers: &view,
                summary: &summary,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Csv => {
            let mut df = customers_to_dataframe(&view)?;
            write_csv_to(&mut df, io::stdout().lock())?;
        }
    }

    if let Some(path) = &args.output {
        let mut df = customers_to_dataframe(&view)?;
        write_csv(&mut df, path)
            .with_context(|| format!("failed to write customer table to {}", path.display()))?;
        info!(path = %path.display(), rows = view.len(), "wrote customer table");
    }

    if let Some(path) = &args.summary_output {
        let mut df = summary_to_dataframe(&summary)?;
        write_csv(&mut df, path)
            .with_context(|| format!("failed to write segment summary to {}", path.display()))?;
        info!(path = %path.display(), "wrote segment summary");
    }

    if let Some(dir) = &args.charts {
        render_charts(&view, &window, dir)?;
    }

    Ok(())
}

/// Install the fmt subscriber; `RFM_LOG` overrides the level picked from the CLI
fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("RFM_LOG").unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

#[cfg(feature = "charts")]
fn render_charts(view: &[CustomerRfm], window: &[&Transaction], dir: &Path) -> Result<()> {
    let written = rfmforge::generate_chart_report(view, window, dir)
        .with_context(|| format!("failed to render charts into {}", dir.display()))?;
    info!(dir = %dir.display(), charts = written.len(), "rendered charts");
    Ok(())
}

#[cfg(not(feature = "charts"))]
fn render_charts(_view: &[CustomerRfm], _window: &[&Transaction], dir: &Path) -> Result<()> {
    warn!(dir = %dir.display(), "built without the charts feature, skipping charts");
    Ok(())
}

/// Print the human-readable report
fn print_report(
    args: &Args,
    headline: Overview,
    reference_date: Option<NaiveDateTime>,
    window: &[&Transaction],
    view: &[CustomerRfm],
    summary: &[SegmentSummary],
) -> Result<()> {
    println!("=== Customer Segmentation with RFM Analysis ===\n");
    println!("Transactions:     {}", headline.transactions);
    println!("Total customers:  {}", headline.customers);
    println!("Total sales:      ${:.2}", headline.total_sales);
    if let Some(reference) = reference_date {
        println!("Reference date:   {}", reference.date());
    }

    if view.is_empty() {
        println!("\nNo data available for selected filters.");
        return Ok(());
    }

    println!("\n=== Segment Distribution ===");
    for (segment, count) in segment_distribution(view) {
        let percentage = count as f64 / view.len() as f64 * 100.0;
        println!("  {:<20} {:>6} ({:.1}%)", segment.label(), count, percentage);
    }

    println!("\n=== Profit by Segment ===");
    for (segment, profit) in profit_by_segment(view) {
        println!("  {:<20} {:>14.2}", segment.label(), profit);
    }

    println!("\n=== Sales per Product Category ===");
    for (category, sales) in sales_by_category(window.iter().copied()) {
        println!("  {:<20} {:>14.2}", category, sales);
    }

    println!("\n=== Unique Customers Over Time ===");
    for month in monthly_active_customers(window.iter().copied()) {
        println!("  {}  {:>6}", month.month, month.customers);
    }

    println!("\n=== RFM Table (first {} rows) ===", args.rows.min(view.len()));
    let df = customers_to_dataframe(view)?;
    println!("{}", df.head(Some(args.rows)));

    println!("\n=== Segment Summary ===");
    println!("{}", summary_to_dataframe(summary)?);

    Ok(())
}
