//! Text summary builder for headless output.
//!
//! Formats the final (or current) state of a run as plain lines for stderr or a pipe.

use crate::dashboard::table;
use crate::metrics;
use crate::model::{Field, Snapshot};

/// Pre-formatted lines for text output.
pub struct TextSummary {
    pub lines: Vec<String>,
}

const TREND_WIDTH: usize = 60;

const STAT_FIELDS: &[Field] = &[
    Field::TemperatureInst,
    Field::PotentialInst,
    Field::TotalEnergy,
    Field::CpuTimePerStep,
];

const TREND_FIELDS: &[(Field, &str)] = &[
    (Field::PotentialInst, "Potential energy trend"),
    (Field::TotalEnergy, "Total energy trend"),
    (Field::TemperatureInst, "Temperature trend"),
];

pub fn build_text_summary(snap: &Snapshot) -> TextSummary {
    let mut lines = Vec::new();
    let status = snap
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    lines.push(format!(
        "Project: {}  Status: {status}  Runtime: {}",
        snap.project,
        format_runtime(snap.runtime_seconds)
    ));
    lines.push(format!("Log: {}", snap.logfile));

    for row in table::metric_rows(snap) {
        lines.push(format!("{}: {}", row.label, row.value));
    }

    for field in STAT_FIELDS {
        let values = metrics::present(snap.field_series(*field));
        if let Some((mean, median, p25, p75)) = metrics::compute_metrics(&values) {
            let p = table::precision(*field);
            lines.push(format!(
                "{}: avg {mean:.p$} med {median:.p$} p25 {p25:.p$} p75 {p75:.p$}",
                field.label()
            ));
        }
    }

    for (field, label) in TREND_FIELDS {
        let series = snap.field_series(*field);
        if metrics::present(series).is_empty() {
            continue;
        }
        lines.push(format!(
            "{label}: {}",
            metrics::ascii_sparkline(series, TREND_WIDTH)
        ));
    }

    TextSummary { lines }
}

/// `1h02m03s` / `2m05s` / `4.2s`.
pub fn format_runtime(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "-".to_string();
    }
    if seconds < 60.0 {
        return format!("{seconds:.1}s");
    }
    let total = seconds.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else {
        format!("{m}m{s:02}s")
    }
}
