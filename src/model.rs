//! Quartile scoring and rule-based segment assignment

use std::fmt;
use std::ops::RangeInclusive;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::{aggregate, RfmData, Transaction, TransactionFilter};
use crate::error::{Result, RfmError};

/// Highest score a metric can receive
pub const MAX_SCORE: u8 = 4;

/// The three scored RFM dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Recency,
    Frequency,
    Monetary,
}

impl Metric {
    /// Lower recency is better, so its bins are scored in reverse
    fn reversed(self) -> bool {
        matches!(self, Metric::Recency)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Recency => "Recency",
            Metric::Frequency => "Frequency",
            Metric::Monetary => "Monetary",
        };
        f.write_str(name)
    }
}

/// What to do when a metric cannot be split into four distinct quartile bins
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DegeneratePolicy {
    /// Refuse to segment and report every degenerate metric
    #[default]
    Fail,
    /// Collapse duplicate edges; some scores may go unused
    Coarsen,
    /// Bin ordinal ranks of a degenerate metric; ties broken by customer order.
    /// Metrics with valid quartiles are binned on raw values as usual.
    Rank,
}

/// Segmentation engine settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    pub degenerate_policy: DegeneratePolicy,
}

impl SegmentationConfig {
    pub fn with_policy(degenerate_policy: DegeneratePolicy) -> Self {
        Self { degenerate_policy }
    }
}

/// Empirical quartile edges `[q0, q1, q2, q3, q4]` of a population
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuartileEdges([f64; 5]);

impl QuartileEdges {
    /// Compute edges with linear interpolation between order statistics.
    /// Returns `None` for an empty population.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let mut edges = [0.0; 5];
        for (i, edge) in edges.iter_mut().enumerate() {
            *edge = quantile(&sorted, i as f64 / 4.0);
        }
        Some(Self(edges))
    }

    pub fn edges(&self) -> [f64; 5] {
        self.0
    }

    /// True when two adjacent edges coincide, leaving fewer than four bins
    pub fn is_degenerate(&self) -> bool {
        !self.0.windows(2).all(|pair| pair[0] < pair[1])
    }

    /// Forward bin for a value: right-closed bins, lowest edge included in bin 1
    pub fn bin(&self, value: f64) -> u8 {
        1 + self.0[1..4].iter().filter(|&&edge| value > edge).count() as u8
    }
}

fn quantile(sorted: &[f64], p: f64) -> f64 {
    let position = p * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// 1-based ordinal ranks; equal values keep their input order
fn ordinal_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        ranks[idx] = (rank + 1) as f64;
    }
    ranks
}

/// Bin one metric column. `None` means the column is degenerate under `Fail`.
///
/// Policies only come into play when the raw quartile edges collapse.
fn bin_metric(metric: Metric, values: &[f64], policy: DegeneratePolicy) -> Option<Vec<u8>> {
    let Some(edges) = QuartileEdges::from_values(values) else {
        return Some(Vec::new());
    };

    let bins: Vec<u8> = if !edges.is_degenerate() {
        values.iter().map(|&value| edges.bin(value)).collect()
    } else {
        match policy {
            DegeneratePolicy::Fail => return None,
            DegeneratePolicy::Coarsen => {
                warn!(%metric, edges = ?edges.edges(), "quartile edges collapse, using coarse bins");
                values.iter().map(|&value| edges.bin(value)).collect()
            }
            DegeneratePolicy::Rank => {
                warn!(%metric, edges = ?edges.edges(), "quartile edges collapse, binning ranks");
                let ranks = ordinal_ranks(values);
                // a single customer still collapses: every rank shares bin 1
                let rank_edges = QuartileEdges::from_values(&ranks)?;
                ranks.iter().map(|&rank| rank_edges.bin(rank)).collect()
            }
        }
    };

    let scores = bins
        .into_iter()
        .map(|bin| {
            if metric.reversed() {
                MAX_SCORE + 1 - bin
            } else {
                bin
            }
        })
        .collect();
    Some(scores)
}

/// Score a single metric column into quartile scores 1..=4.
pub fn score_metric(metric: Metric, values: &[f64], policy: DegeneratePolicy) -> Result<Vec<u8>> {
    bin_metric(metric, values, policy).ok_or(RfmError::DegenerateDistribution {
        metrics: vec![metric],
    })
}

/// Quartile scores for one customer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RfmScores {
    pub recency: u8,
    pub frequency: u8,
    pub monetary: u8,
}

impl RfmScores {
    pub fn new(recency: u8, frequency: u8, monetary: u8) -> Self {
        Self {
            recency,
            frequency,
            monetary,
        }
    }

    /// Display code with digits in R, F, M order, e.g. `"432"`
    pub fn code(&self) -> String {
        format!("{}{}{}", self.recency, self.frequency, self.monetary)
    }
}

/// Behavioral segment labels, declared in rule-table order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
pub enum Segment {
    #[serde(rename = "Champion")]
    Champion,
    #[serde(rename = "Loyal Customer")]
    LoyalCustomer,
    #[serde(rename = "Potential Loyalist")]
    PotentialLoyalist,
    #[serde(rename = "Recent Customer")]
    RecentCustomer,
    #[serde(rename = "Promising")]
    Promising,
    #[serde(rename = "At Risk")]
    AtRisk,
    #[serde(rename = "Need Attention")]
    NeedAttention,
    #[serde(rename = "Hibernating")]
    Hibernating,
}

impl Segment {
    pub const ALL: [Segment; 8] = [
        Segment::Champion,
        Segment::LoyalCustomer,
        Segment::PotentialLoyalist,
        Segment::RecentCustomer,
        Segment::Promising,
        Segment::AtRisk,
        Segment::NeedAttention,
        Segment::Hibernating,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Segment::Champion => "Champion",
            Segment::LoyalCustomer => "Loyal Customer",
            Segment::PotentialLoyalist => "Potential Loyalist",
            Segment::RecentCustomer => "Recent Customer",
            Segment::Promising => "Promising",
            Segment::AtRisk => "At Risk",
            Segment::NeedAttention => "Need Attention",
            Segment::Hibernating => "Hibernating",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of the segment rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRule {
    pub recency: RangeInclusive<u8>,
    pub frequency: RangeInclusive<u8>,
    pub monetary: RangeInclusive<u8>,
    pub segment: Segment,
}

impl SegmentRule {
    pub fn matches(&self, scores: RfmScores) -> bool {
        self.recency.contains(&scores.recency)
            && self.frequency.contains(&scores.frequency)
            && self.monetary.contains(&scores.monetary)
    }
}

const ANY: RangeInclusive<u8> = 1..=MAX_SCORE;

/// Segment rules, evaluated top-down; the first match wins.
///
/// Monetary only takes part in the first rule.
#[rustfmt::skip]
pub static SEGMENT_RULES: [SegmentRule; 8] = [
    SegmentRule { recency: 3..=4, frequency: 3..=4, monetary: 3..=4, segment: Segment::Champion },
    SegmentRule { recency: 3..=4, frequency: 2..=4, monetary: ANY, segment: Segment::LoyalCustomer },
    SegmentRule { recency: 2..=2, frequency: 2..=4, monetary: ANY, segment: Segment::PotentialLoyalist },
    SegmentRule { recency: 3..=4, frequency: 1..=1, monetary: ANY, segment: Segment::RecentCustomer },
    SegmentRule { recency: 2..=2, frequency: 1..=1, monetary: ANY, segment: Segment::Promising },
    SegmentRule { recency: 1..=1, frequency: 3..=4, monetary: ANY, segment: Segment::AtRisk },
    SegmentRule { recency: 1..=1, frequency: 2..=2, monetary: ANY, segment: Segment::NeedAttention },
    SegmentRule { recency: ANY, frequency: ANY, monetary: ANY, segment: Segment::Hibernating },
];

/// Map a score triple to its segment
pub fn assign_segment(scores: RfmScores) -> Segment {
    SEGMENT_RULES
        .iter()
        .find(|rule| rule.matches(scores))
        .map_or(Segment::Hibernating, |rule| rule.segment)
}

/// Fully scored and segmented customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRfm {
    pub customer_id: String,
    #[serde(rename = "Recency")]
    pub recency: i64,
    #[serde(rename = "Frequency")]
    pub frequency: usize,
    #[serde(rename = "Monetary")]
    pub monetary: f64,
    #[serde(rename = "Profit")]
    pub profit: f64,
    #[serde(rename = "R_score")]
    pub r_score: u8,
    #[serde(rename = "F_score")]
    pub f_score: u8,
    #[serde(rename = "M_score")]
    pub m_score: u8,
    #[serde(rename = "RFM_Score")]
    pub rfm_score: String,
    #[serde(rename = "Segment")]
    pub segment: Segment,
    pub state: Option<String>,
}

impl CustomerRfm {
    pub fn scores(&self) -> RfmScores {
        RfmScores::new(self.r_score, self.f_score, self.m_score)
    }
}

/// Score every customer and assign segments.
///
/// Quartiles are computed over the customers in `rfm` only, so the result
/// depends on whatever window the caller aggregated.
pub fn segment_customers(rfm: &RfmData, config: &SegmentationConfig) -> Result<Vec<CustomerRfm>> {
    if rfm.is_empty() {
        return Ok(Vec::new());
    }

    let policy = config.degenerate_policy;
    let recency = bin_metric(Metric::Recency, &rfm.recency_values(), policy);
    let frequency = bin_metric(Metric::Frequency, &rfm.frequency_values(), policy);
    let monetary = bin_metric(Metric::Monetary, &rfm.monetary_values(), policy);

    let (Some(recency), Some(frequency), Some(monetary)) = (&recency, &frequency, &monetary) else {
        let metrics = [
            (Metric::Recency, recency.is_none()),
            (Metric::Frequency, frequency.is_none()),
            (Metric::Monetary, monetary.is_none()),
        ]
        .into_iter()
        .filter_map(|(metric, failed)| failed.then_some(metric))
        .collect();
        return Err(RfmError::DegenerateDistribution { metrics });
    };

    let customers: Vec<CustomerRfm> = rfm
        .customers
        .iter()
        .enumerate()
        .map(|(i, customer)| {
            let scores = RfmScores::new(recency[i], frequency[i], monetary[i]);
            CustomerRfm {
                customer_id: customer.customer_id.clone(),
                recency: customer.recency,
                frequency: customer.frequency,
                monetary: customer.monetary,
                profit: customer.profit,
                r_score: scores.recency,
                f_score: scores.frequency,
                m_score: scores.monetary,
                rfm_score: scores.code(),
                segment: assign_segment(scores),
                state: customer.state.clone(),
            }
        })
        .collect();

    debug!(customers = customers.len(), ?policy, "segmented customers");
    Ok(customers)
}

/// Run the whole pipeline: filter, aggregate, score, segment.
pub fn segment_transactions(
    transactions: &[Transaction],
    filter: &TransactionFilter,
    config: &SegmentationConfig,
) -> Result<Vec<CustomerRfm>> {
    let rfm = aggregate(filter.apply(transactions));
    segment_customers(&rfm, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CustomerMetrics;
    use chrono::NaiveDate;

    fn metrics(id: &str, recency: i64, frequency: usize, monetary: f64) -> CustomerMetrics {
        CustomerMetrics {
            customer_id: id.to_string(),
            recency,
            frequency,
            monetary,
            profit: monetary / 10.0,
            last_order: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            state: None,
        }
    }

    fn create_test_rfm_data() -> RfmData {
        // customer i: recency 80 - 10i, frequency i, monetary 10i
        let customers = (1..=8)
            .map(|i| metrics(&format!("C{i}"), 80 - 10 * i as i64, i, 10.0 * i as f64))
            .collect();
        RfmData {
            reference_date: None,
            customers,
        }
    }

    fn reference_segment(r: u8, f: u8, m: u8) -> Segment {
        if r >= 3 && f >= 3 && m >= 3 {
            Segment::Champion
        } else if r >= 3 && f >= 2 {
            Segment::LoyalCustomer
        } else if r == 2 && f >= 2 {
            Segment::PotentialLoyalist
        } else if r >= 3 && f == 1 {
            Segment::RecentCustomer
        } else if r == 2 && f == 1 {
            Segment::Promising
        } else if r == 1 && f >= 3 {
            Segment::AtRisk
        } else if r == 1 && f == 2 {
            Segment::NeedAttention
        } else {
            Segment::Hibernating
        }
    }

    #[test]
    fn test_quartile_edges_interpolate() {
        let values: Vec<f64> = (1..=8).map(f64::from).collect();
        let edges = QuartileEdges::from_values(&values).unwrap();
        assert_eq!(edges.edges(), [1.0, 2.75, 4.5, 6.25, 8.0]);
        assert!(!edges.is_degenerate());

        assert_eq!(QuartileEdges::from_values(&[]), None);
    }

    #[test]
    fn test_bins_are_right_closed() {
        let edges = QuartileEdges::from_values(&[0.0, 10.0, 20.0, 30.0, 40.0]).unwrap();
        assert_eq!(edges.edges(), [0.0, 10.0, 20.0, 30.0, 40.0]);
        assert_eq!(edges.bin(0.0), 1);
        assert_eq!(edges.bin(10.0), 1);
        assert_eq!(edges.bin(10.5), 2);
        assert_eq!(edges.bin(30.0), 3);
        assert_eq!(edges.bin(40.0), 4);
    }

    #[test]
    fn test_forward_and_reverse_scoring() {
        let values: Vec<f64> = (1..=8).map(f64::from).collect();
        let forward = score_metric(Metric::Frequency, &values, DegeneratePolicy::Fail).unwrap();
        assert_eq!(forward, vec![1, 1, 2, 2, 3, 3, 4, 4]);

        let reverse = score_metric(Metric::Recency, &values, DegeneratePolicy::Fail).unwrap();
        assert_eq!(reverse, vec![4, 4, 3, 3, 2, 2, 1, 1]);
    }

    #[test]
    fn test_fail_policy_reports_degenerate_metric() {
        let values = [1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 3.0, 4.0];
        match score_metric(Metric::Frequency, &values, DegeneratePolicy::Fail) {
            Err(RfmError::DegenerateDistribution { metrics }) => {
                assert_eq!(metrics, vec![Metric::Frequency])
            }
            other => panic!("expected degenerate distribution, got {other:?}"),
        }
    }

    #[test]
    fn test_coarsen_policy_collapses_bins() {
        let values = [1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 3.0, 4.0];
        let scores = score_metric(Metric::Frequency, &values, DegeneratePolicy::Coarsen).unwrap();
        assert_eq!(scores, vec![1, 1, 1, 1, 1, 3, 4, 4]);

        let flat = [5.0; 6];
        let forward = score_metric(Metric::Monetary, &flat, DegeneratePolicy::Coarsen).unwrap();
        assert_eq!(forward, vec![1; 6]);
        let reverse = score_metric(Metric::Recency, &flat, DegeneratePolicy::Coarsen).unwrap();
        assert_eq!(reverse, vec![4; 6]);
    }

    #[test]
    fn test_rank_policy_balances_bins() {
        let values = [1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 3.0, 4.0];
        let scores = score_metric(Metric::Frequency, &values, DegeneratePolicy::Rank).unwrap();
        assert_eq!(scores, vec![1, 1, 2, 2, 3, 3, 4, 4]);

        let single = score_metric(Metric::Recency, &[3.0], DegeneratePolicy::Rank).unwrap();
        assert_eq!(single, vec![4]);
    }

    #[test]
    fn test_ties_on_quartile_edge_share_a_bin() {
        let values = [1.0, 2.0, 2.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let edges = QuartileEdges::from_values(&values).unwrap();
        assert_eq!(edges.edges(), [1.0, 2.0, 2.5, 4.25, 6.0]);
        assert!(!edges.is_degenerate());

        for policy in [
            DegeneratePolicy::Fail,
            DegeneratePolicy::Coarsen,
            DegeneratePolicy::Rank,
        ] {
            let scores = score_metric(Metric::Frequency, &values, policy).unwrap();
            assert_eq!(scores, vec![1, 1, 1, 1, 3, 3, 4, 4], "{policy:?}");
        }
    }

    #[test]
    fn test_rank_policy_leaves_valid_metrics_alone() {
        let mut rfm = create_test_rfm_data();
        for customer in &mut rfm.customers {
            customer.recency = 0;
        }
        rfm.customers[2].frequency = 2;
        rfm.customers[3].frequency = 2;

        let ranked =
            segment_customers(&rfm, &SegmentationConfig::with_policy(DegeneratePolicy::Rank))
                .unwrap();
        let frequency: Vec<f64> = rfm.frequency_values();
        let expected = score_metric(Metric::Frequency, &frequency, DegeneratePolicy::Fail).unwrap();
        let f_scores: Vec<u8> = ranked.iter().map(|c| c.f_score).collect();
        assert_eq!(f_scores, expected);

        let r_scores: Vec<u8> = ranked.iter().map(|c| c.r_score).collect();
        assert_eq!(r_scores, vec![4, 4, 3, 3, 2, 2, 1, 1]);
    }

    #[test]
    fn test_rule_precedence() {
        assert_eq!(assign_segment(RfmScores::new(3, 3, 3)), Segment::Champion);
        assert_eq!(assign_segment(RfmScores::new(1, 1, 4)), Segment::Hibernating);
        assert_eq!(assign_segment(RfmScores::new(3, 3, 2)), Segment::LoyalCustomer);
        assert_eq!(assign_segment(RfmScores::new(4, 2, 4)), Segment::LoyalCustomer);
        assert_eq!(assign_segment(RfmScores::new(2, 4, 4)), Segment::PotentialLoyalist);
        assert_eq!(assign_segment(RfmScores::new(4, 1, 4)), Segment::RecentCustomer);
        assert_eq!(assign_segment(RfmScores::new(2, 1, 1)), Segment::Promising);
        assert_eq!(assign_segment(RfmScores::new(1, 4, 4)), Segment::AtRisk);
        assert_eq!(assign_segment(RfmScores::new(1, 2, 4)), Segment::NeedAttention);
    }

    #[test]
    fn test_rule_table_matches_reference_chain() {
        for r in 1..=4 {
            for f in 1..=4 {
                for m in 1..=4 {
                    assert_eq!(
                        assign_segment(RfmScores::new(r, f, m)),
                        reference_segment(r, f, m),
                        "scores {r}{f}{m}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_rule_table_order_follows_segment_order() {
        let order: Vec<Segment> = SEGMENT_RULES.iter().map(|rule| rule.segment).collect();
        assert_eq!(order, Segment::ALL.to_vec());
    }

    #[test]
    fn test_rfm_code() {
        assert_eq!(RfmScores::new(4, 3, 2).code(), "432");
    }

    #[test]
    fn test_segment_customers() {
        let rfm = create_test_rfm_data();
        let customers = segment_customers(&rfm, &SegmentationConfig::default()).unwrap();
        assert_eq!(customers.len(), 8);

        let codes: Vec<&str> = customers.iter().map(|c| c.rfm_score.as_str()).collect();
        assert_eq!(codes, ["111", "111", "222", "222", "333", "333", "444", "444"]);

        let segments: Vec<Segment> = customers.iter().map(|c| c.segment).collect();
        assert_eq!(
            segments,
            [
                Segment::Hibernating,
                Segment::Hibernating,
                Segment::PotentialLoyalist,
                Segment::PotentialLoyalist,
                Segment::Champion,
                Segment::Champion,
                Segment::Champion,
                Segment::Champion,
            ]
        );
        assert_eq!(customers[4].scores(), RfmScores::new(3, 3, 3));
    }

    #[test]
    fn test_segment_customers_lists_all_degenerate_metrics() {
        let mut rfm = create_test_rfm_data();
        for customer in &mut rfm.customers {
            customer.recency = 0;
            customer.monetary = 25.0;
        }

        match segment_customers(&rfm, &SegmentationConfig::default()) {
            Err(RfmError::DegenerateDistribution { metrics }) => {
                assert_eq!(metrics, vec![Metric::Recency, Metric::Monetary])
            }
            other => panic!("expected degenerate distribution, got {other:?}"),
        }

        let coarse = SegmentationConfig::with_policy(DegeneratePolicy::Coarsen);
        let customers = segment_customers(&rfm, &coarse).unwrap();
        assert!(customers.iter().all(|c| c.r_score == 4 && c.m_score == 1));
        // frequency still scores independently
        assert_eq!(customers[7].f_score, 4);
    }

    #[test]
    fn test_segment_customers_empty() {
        let customers =
            segment_customers(&RfmData::default(), &SegmentationConfig::default()).unwrap();
        assert!(customers.is_empty());
    }

    #[test]
    fn test_segment_serializes_with_labels() {
        let json = serde_json::to_string(&Segment::LoyalCustomer).unwrap();
        assert_eq!(json, "\"Loyal Customer\"");

        let policy: DegeneratePolicy = serde_json::from_str("\"coarsen\"").unwrap();
        assert_eq!(policy, DegeneratePolicy::Coarsen);
    }
}
