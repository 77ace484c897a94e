//! Error types for RFM ingestion and segmentation.

use chrono::NaiveDate;
use polars::prelude::PolarsError;
use thiserror::Error;

use crate::model::Metric;

/// Result type alias for RFMForge operations.
pub type Result<T> = std::result::Result<T, RfmError>;

/// Unified error type for the RFM pipeline.
#[derive(Error, Debug)]
pub enum RfmError {
    // Input errors
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("row {row}: missing required value for {column}")]
    MissingValue { row: usize, column: &'static str },

    #[error("row {row}: cannot parse order_date {value:?}")]
    InvalidTimestamp { row: usize, value: String },

    #[error("row {row}: invalid {column} value {value:?}")]
    InvalidNumber {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("row {row}: sales must be a non-negative amount, got {value}")]
    NegativeSales { row: usize, value: f64 },

    // Filter errors
    #[error("invalid date range: {from} is after {to}")]
    InvalidDateRange { from: NaiveDate, to: NaiveDate },

    // Segmentation errors
    #[error("cannot segment: insufficient data variety in {}", metric_list(.metrics))]
    DegenerateDistribution { metrics: Vec<Metric> },

    // I/O and serialization
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table error: {0}")]
    Polars(#[from] PolarsError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn metric_list(metrics: &[Metric]) -> String {
    metrics
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
