//! Chart rendering using Plotters for segment analysis

use std::fs;
use std::path::{Path, PathBuf};

use plotters::prelude::*;

use crate::data::Transaction;
use crate::model::{CustomerRfm, Segment};
use crate::report::{
    monthly_active_customers, profit_by_segment, sales_by_category, segment_distribution,
    MonthlyActivity,
};

/// Palette for category charts
const CATEGORY_COLORS: [RGBColor; 5] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
];

fn segment_color(segment: Segment) -> RGBColor {
    match segment {
        Segment::Champion => RGBColor(26, 152, 80),
        Segment::LoyalCustomer => RGBColor(102, 189, 99),
        Segment::PotentialLoyalist => RGBColor(166, 217, 106),
        Segment::RecentCustomer => RGBColor(69, 117, 180),
        Segment::Promising => RGBColor(116, 173, 209),
        Segment::AtRisk => RGBColor(244, 109, 67),
        Segment::NeedAttention => RGBColor(253, 174, 97),
        Segment::Hibernating => RGBColor(150, 150, 150),
    }
}

/// Bar chart with one labelled bar per entry; handles negative values
fn draw_bar_chart(
    output_path: &Path,
    title: &str,
    y_desc: &str,
    bars: &[(String, f64, RGBColor)],
) -> anyhow::Result<()> {
    let (low, high) = bars
        .iter()
        .fold((0.0f64, 0.0f64), |(lo, hi), (_, value, _)| (lo.min(*value), hi.max(*value)));
    let span = (high - low).max(1.0);
    let y_min = if low < 0.0 { low - span * 0.05 } else { 0.0 };
    let y_max = high + span * 0.1;
    let n = bars.len().max(1) as f64;

    let root = BitMapBackend::new(output_path, (900, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..(n - 0.5), y_min..y_max)?;

    let label_at = |x: &f64| {
        let idx = x.round();
        if (x - idx).abs() > 1e-6 || idx < 0.0 {
            return String::new();
        }
        bars.get(idx as usize)
            .map(|(label, _, _)| label.clone())
            .unwrap_or_default()
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bars.len().max(1))
        .x_label_formatter(&label_at)
        .y_desc(y_desc)
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(bars.iter().enumerate().map(|(i, (_, value, color))| {
        let x = i as f64;
        Rectangle::new([(x - 0.4, 0.0), (x + 0.4, *value)], color.filled())
    }))?;

    root.present()?;
    Ok(())
}

/// Customers per segment
pub fn create_segment_chart(
    distribution: &[(Segment, usize)],
    output_path: &Path,
) -> anyhow::Result<()> {
    let bars: Vec<_> = distribution
        .iter()
        .map(|&(segment, count)| (segment.to_string(), count as f64, segment_color(segment)))
        .collect();
    draw_bar_chart(output_path, "Customer Segmentation Distribution", "Customers", &bars)
}

/// Total profit per segment
pub fn create_profit_chart(profit: &[(Segment, f64)], output_path: &Path) -> anyhow::Result<()> {
    let bars: Vec<_> = profit
        .iter()
        .map(|&(segment, total)| (segment.to_string(), total, segment_color(segment)))
        .collect();
    draw_bar_chart(output_path, "Profit by Customer Segment", "Profit", &bars)
}

/// Total sales per product category
pub fn create_category_chart(sales: &[(String, f64)], output_path: &Path) -> anyhow::Result<()> {
    let bars: Vec<_> = sales
        .iter()
        .enumerate()
        .map(|(i, (category, total))| {
            (category.clone(), *total, CATEGORY_COLORS[i % CATEGORY_COLORS.len()])
        })
        .collect();
    draw_bar_chart(output_path, "Sales per Product Category", "Sales", &bars)
}

/// Distinct customers per month as a line chart
pub fn create_activity_chart(
    activity: &[MonthlyActivity],
    output_path: &Path,
) -> anyhow::Result<()> {
    let max_customers = activity.iter().map(|m| m.customers).max().unwrap_or(1).max(1) as f64;
    let last_x = activity.len().saturating_sub(1).max(1) as f64;

    let root = BitMapBackend::new(output_path, (900, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Unique Customers Over Time", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..last_x, 0f64..(max_customers * 1.1))?;

    let month_at = |x: &f64| {
        let idx = x.round();
        if (x - idx).abs() > 1e-6 || idx < 0.0 {
            return String::new();
        }
        activity
            .get(idx as usize)
            .map(|m| m.month.clone())
            .unwrap_or_default()
    };

    chart
        .configure_mesh()
        .x_labels(activity.len().clamp(2, 12))
        .x_label_formatter(&month_at)
        .x_desc("Month")
        .y_desc("Unique Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    let points: Vec<(f64, f64)> = activity
        .iter()
        .enumerate()
        .map(|(i, m)| (i as f64, m.customers as f64))
        .collect();

    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
    chart.draw_series(
        points
            .iter()
            .map(|&(x, y)| Circle::new((x, y), 3, BLUE.filled())),
    )?;

    root.present()?;
    Ok(())
}

/// Render every chart into `output_dir` and return the written paths
pub fn generate_chart_report(
    customers: &[CustomerRfm],
    transactions: &[&Transaction],
    output_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;

    let segments_path = output_dir.join("segments.png");
    create_segment_chart(&segment_distribution(customers), &segments_path)?;

    let profit_path = output_dir.join("profit_by_segment.png");
    create_profit_chart(&profit_by_segment(customers), &profit_path)?;

    let category_path = output_dir.join("sales_by_category.png");
    create_category_chart(
        &sales_by_category(transactions.iter().copied()),
        &category_path,
    )?;

    let activity_path = output_dir.join("monthly_customers.png");
    create_activity_chart(
        &monthly_active_customers(transactions.iter().copied()),
        &activity_path,
    )?;

    Ok(vec![segments_path, profit_path, category_path, activity_path])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_timestamp;
    use tempfile::tempdir;

    fn create_test_data() -> (Vec<CustomerRfm>, Vec<Transaction>) {
        let customers = [
            ("A", Segment::Champion, 30.0),
            ("B", Segment::AtRisk, -12.5),
            ("C", Segment::Champion, 8.0),
        ]
        .into_iter()
        .map(|(id, segment, profit)| CustomerRfm {
            customer_id: id.to_string(),
            recency: 3,
            frequency: 2,
            monetary: 120.0,
            profit,
            r_score: 4,
            f_score: 3,
            m_score: 3,
            rfm_score: "433".to_string(),
            segment,
            state: None,
        })
        .collect();

        let transactions = vec![
            Transaction::new("A", "1", parse_timestamp("2024-01-05").unwrap(), 60.0, 15.0)
                .with_category("Furniture"),
            Transaction::new("B", "2", parse_timestamp("2024-02-11").unwrap(), 40.0, -12.5)
                .with_category("Technology"),
            Transaction::new("C", "3", parse_timestamp("2024-03-02").unwrap(), 20.0, 8.0),
        ];
        (customers, transactions)
    }

    #[test]
    fn test_create_segment_chart() {
        let (customers, _) = create_test_data();
        let temp_dir = tempdir().unwrap();
        let output_path = temp_dir.path().join("segments.png");

        create_segment_chart(&segment_distribution(&customers), &output_path).unwrap();
        assert!(output_path.exists());
    }

    #[test]
    fn test_create_profit_chart_with_losses() {
        let (customers, _) = create_test_data();
        let temp_dir = tempdir().unwrap();
        let output_path = temp_dir.path().join("profit.png");

        create_profit_chart(&profit_by_segment(&customers), &output_path).unwrap();
        assert!(output_path.exists());
    }

    #[test]
    fn test_generate_chart_report() {
        let (customers, transactions) = create_test_data();
        let window: Vec<&Transaction> = transactions.iter().collect();
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("charts");

        let written = generate_chart_report(&customers, &window, &output_dir).unwrap();
        assert_eq!(written.len(), 4);
        assert!(written.iter().all(|path| path.exists()));
    }
}
