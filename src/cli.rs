//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};

use crate::data::TransactionFilter;
use crate::model::{DegeneratePolicy, Segment, SegmentationConfig};
use crate::report::CustomerFilter;

/// How results are written to stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable report with table previews
    #[default]
    Table,
    /// Customers, summary and overview as one JSON document
    Json,
    /// Customer table as CSV
    Csv,
}

/// Customer segmentation CLI using quartile-based RFM scoring
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input transaction CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: PathBuf,

    /// First order date to include (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last order date to include (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Only report customers from this state
    #[arg(long)]
    pub state: Option<String>,

    /// Only report these segments; repeat to select several
    #[arg(long = "segment", value_enum)]
    pub segments: Vec<Segment>,

    /// Handling of metrics too uniform to split into four quartile bins
    #[arg(
        long,
        value_enum,
        env = "RFM_DEGENERATE_POLICY",
        default_value_t = DegeneratePolicy::Fail
    )]
    pub degenerate_policy: DegeneratePolicy,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Number of customer rows shown in the table preview
    #[arg(long, default_value = "20")]
    pub rows: usize,

    /// Write the full customer table to this CSV file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the segment summary to this CSV file
    #[arg(long)]
    pub summary_output: Option<PathBuf>,

    /// Directory for PNG charts (requires the `charts` feature)
    #[arg(long)]
    pub charts: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Date window applied before aggregation
    pub fn transaction_filter(&self) -> crate::Result<TransactionFilter> {
        TransactionFilter::new(self.from, self.to)
    }

    /// State and segment selection applied after segmentation
    pub fn customer_filter(&self) -> CustomerFilter {
        CustomerFilter {
            state: self.state.clone(),
            segments: self.segments.clone(),
        }
    }

    pub fn segmentation_config(&self) -> SegmentationConfig {
        SegmentationConfig::with_policy(self.degenerate_policy)
    }

    /// Default log level when `RFM_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
