//! Display utilities for formatting CLI output.
//!
//! Table rows for index build reports and coverage statistics.

use tabled::{Table, Tabled};

use footprint_core::{IndexBuildReport, StatsResponse};

/// One labelled value in a two-column summary table.
#[derive(Tabled)]
pub struct SummaryRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl SummaryRow {
    fn new(metric: &str, value: impl ToString) -> Self {
        Self {
            metric: metric.to_string(),
            value: value.to_string(),
        }
    }
}

/// Buildings attributed to one provenance dataset.
#[derive(Tabled)]
pub struct SourceRow {
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Buildings")]
    pub buildings: usize,
}

/// Rows summarizing a finished index build.
pub fn index_report_rows(report: &IndexBuildReport) -> Vec<SummaryRow> {
    vec![
        SummaryRow::new("Index", report.path.display()),
        SummaryRow::new("Files", report.files),
        SummaryRow::new("Buildings", report.rows),
        SummaryRow::new("Size (bytes)", report.bytes),
        SummaryRow::new("Elapsed", format!("{:.2?}", report.elapsed)),
    ]
}

/// Rows of coverage percentages for a result set.
pub fn coverage_rows(stats: &StatsResponse, truncated: bool) -> Vec<SummaryRow> {
    let coverage = &stats.stats;
    vec![
        SummaryRow::new("Buildings", stats.total_buildings),
        SummaryRow::new("Truncated", if truncated { "Yes" } else { "No" }),
        SummaryRow::new("Height coverage", format!("{}%", coverage.height_coverage_pct)),
        SummaryRow::new("Floor coverage", format!("{}%", coverage.floor_coverage_pct)),
        SummaryRow::new("Class coverage", format!("{}%", coverage.class_coverage_pct)),
        SummaryRow::new(
            "Average height",
            coverage
                .avg_height
                .map_or_else(|| "N/A".to_string(), |h| format!("{h:.1} m")),
        ),
    ]
}

/// Provenance rows, most common source first.
pub fn source_rows(stats: &StatsResponse) -> Vec<SourceRow> {
    let mut rows: Vec<SourceRow> = stats
        .stats
        .source_breakdown
        .iter()
        .map(|(source, count)| SourceRow {
            source: source.clone(),
            buildings: *count,
        })
        .collect();
    rows.sort_by(|a, b| b.buildings.cmp(&a.buildings).then_with(|| a.source.cmp(&b.source)));
    rows
}

pub fn display_index_report(report: &IndexBuildReport) {
    println!("\n=== Index Build ===");
    println!("{}", Table::new(index_report_rows(report)));
}

/// Display coverage statistics and the source breakdown as tables.
pub fn display_stats(stats: &StatsResponse, truncated: bool) {
    println!("\n=== Coverage ===");
    println!("{}", Table::new(coverage_rows(stats, truncated)));

    let sources = source_rows(stats);
    if !sources.is_empty() {
        println!("\n=== Sources ===");
        println!("{}", Table::new(sources));
    }
}
