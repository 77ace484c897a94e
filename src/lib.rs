//! RFMForge: A Rust CLI application and library for customer segmentation using RFM analysis
//!
//! Transactions are collapsed into per-customer Recency, Frequency and Monetary
//! metrics, each metric is scored 1-4 by empirical quartiles, and the score triple
//! is mapped to a named segment through an ordered rule table.

pub mod cli;
pub mod data;
pub mod error;
pub mod model;
pub mod report;
#[cfg(feature = "charts")]
pub mod viz;

// Re-export public items for easier access
pub use cli::{Args, OutputFormat};
pub use data::{
    aggregate, load_transactions, parse_timestamp, transactions_from_dataframe, CustomerMetrics,
    RfmData, Transaction, TransactionFilter,
};
pub use error::{Result, RfmError};
pub use model::{
    assign_segment, score_metric, segment_customers, segment_transactions, CustomerRfm,
    DegeneratePolicy, Metric, QuartileEdges, RfmScores, Segment, SegmentRule, SegmentationConfig,
    SEGMENT_RULES,
};
pub use report::{
    customers_to_dataframe, monthly_active_customers, overview, profit_by_segment,
    sales_by_category, segment_distribution, segment_summary, summary_to_dataframe, write_csv,
    write_csv_to, CustomerFilter, MonthlyActivity, Overview, SegmentSummary,
};
#[cfg(feature = "charts")]
pub use viz::generate_chart_report;
