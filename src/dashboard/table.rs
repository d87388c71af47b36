//! Renderer-independent table models built from a [`Snapshot`].

use crate::metrics;
use crate::model::{Field, Snapshot};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRow {
    pub label: String,
    pub value: String,
}

impl MetricRow {
    fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Fields listed in the "latest values" table, in display order.
pub const METRIC_FIELDS: &[Field] = &[
    Field::TimeFs,
    Field::CpuTimePerStep,
    Field::TemperatureInst,
    Field::PotentialInst,
    Field::KineticInst,
    Field::TotalEnergy,
    Field::ConservedEnergy,
    Field::EnergyDriftInst,
    Field::PotentialAvg,
    Field::KineticAvg,
    Field::TotalEnergyAvg,
    Field::EnergyDriftAvg,
];

pub fn precision(field: Field) -> usize {
    match field {
        Field::TimeFs => 4,
        Field::CpuTimePerStep | Field::CpuTimePerStepAvg => 3,
        Field::TemperatureInst | Field::TemperatureAvg => 2,
        _ => 6,
    }
}

pub fn format_value(field: Field, value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.*}", precision(field), v),
        None => "-".to_string(),
    }
}

/// Step count followed by the latest non-null value of each field in [`METRIC_FIELDS`].
pub fn metric_rows(snap: &Snapshot) -> Vec<MetricRow> {
    let mut rows = Vec::with_capacity(METRIC_FIELDS.len() + 1);
    let steps = match snap.last_step() {
        Some(last) => format!("{} (last {last})", snap.step_count()),
        None => snap.step_count().to_string(),
    };
    rows.push(MetricRow::new("MD steps", steps));
    for field in METRIC_FIELDS {
        let latest = metrics::latest(snap.field_series(*field));
        rows.push(MetricRow::new(field.label(), format_value(*field, latest)));
    }
    rows
}

/// Where CP2K writes the MD trajectory for this run.
pub fn positions_path(snap: &Snapshot) -> PathBuf {
    let name = format!("{}-pos-1.xyz", snap.project);
    Path::new(&snap.logfile)
        .parent()
        .map(|dir| dir.join(&name))
        .unwrap_or_else(|| PathBuf::from(&name))
}

pub fn positions_row(snap: &Snapshot) -> MetricRow {
    let path = positions_path(snap);
    let value = if path.exists() {
        path.display().to_string()
    } else {
        "(pending write)".to_string()
    };
    MetricRow::new("Positions file", value)
}

/// One finalized MD step in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRow {
    pub step: i64,
    pub cells: Vec<Option<f64>>,
}

/// All blocks sorted by step, one cell per [`Field::ALL`] column.
pub fn block_rows(snap: &Snapshot) -> Vec<BlockRow> {
    let mut rows: Vec<BlockRow> = snap
        .blocks
        .iter()
        .map(|b| BlockRow {
            step: b.step,
            cells: Field::ALL.iter().map(|f| b.get(*f)).collect(),
        })
        .collect();
    rows.sort_by_key(|r| r.step);
    rows
}

/// Columns that carry at least one value, so empty observables do not waste width.
pub fn populated_columns(rows: &[BlockRow]) -> Vec<Field> {
    Field::ALL
        .iter()
        .enumerate()
        .filter(|(i, _)| rows.iter().any(|r| r.cells[*i].is_some()))
        .map(|(_, f)| *f)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::Extractor;
    use crate::model::RunStatus;
    use crate::state::{load_snapshot, RunMeta, RunState};

    fn populated_state() -> RunState {
        let state = RunState::new(RunMeta {
            project: "water".into(),
            logfile: "water.out".into(),
            ..RunMeta::default()
        });
        let mut ex = Extractor::new();
        let mut sink = &state;
        for line in [
            " MD| Step number 2",
            " MD| Time [fs] 1.0",
            " MD| Temperature [K] 301.25 300.5",
            " MD| Potential energy [hartree] -17.1 -17.0",
            " MD| Kinetic energy [hartree] 0.01 0.011",
            " MD| ***",
            " MD| Step number 1",
            " MD| Temperature [K] 299.0 299.0",
            " MD| ***",
            "  Total energy:   -17.2",
        ] {
            ex.feed(line, &mut sink);
        }
        state.finalize(0);
        state
    }

    #[test]
    fn latest_values_and_step_count() {
        let snap = populated_state().snapshot();
        let rows = metric_rows(&snap);
        assert_eq!(rows[0].value, "2 (last 1)");
        let temp = rows.iter().find(|r| r.label == "Temperature [K]").unwrap();
        assert_eq!(temp.value, "299.00");
        // Last non-null potential comes from step 2.
        let pot = rows.iter().find(|r| r.label == "Potential E [Ha]").unwrap();
        assert_eq!(pot.value, "-17.100000");
        let total = rows.iter().find(|r| r.label == "Total E [Ha]").unwrap();
        assert_eq!(total.value, "-17.200000");
        assert_eq!(snap.status, Some(RunStatus::Completed));
    }

    #[test]
    fn block_rows_sorted_by_step() {
        let snap = populated_state().snapshot();
        let rows = block_rows(&snap);
        assert_eq!(rows.iter().map(|r| r.step).collect::<Vec<_>>(), vec![1, 2]);
        let cols = populated_columns(&rows);
        assert!(cols.contains(&Field::TemperatureInst));
        assert!(!cols.contains(&Field::HartreeEnergy));
    }

    #[test]
    fn tables_survive_the_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("water.state.json");
        let state = populated_state();
        state.persist_to(&path, true);
        let live = state.snapshot();
        let reloaded = load_snapshot(&path).unwrap();

        assert_eq!(metric_rows(&live), metric_rows(&reloaded));
        let a = block_rows(&live);
        let b = block_rows(&reloaded);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.step, y.step);
            for (p, q) in x.cells.iter().zip(&y.cells) {
                match (p, q) {
                    (Some(p), Some(q)) => assert!((p - q).abs() < 1e-12),
                    (None, None) => {}
                    other => panic!("cell presence differs: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn positions_file_is_next_to_the_log() {
        let snap = Snapshot {
            project: "water".into(),
            logfile: "/runs/a/water.out".into(),
            ..Snapshot::default()
        };
        assert_eq!(positions_path(&snap), PathBuf::from("/runs/a/water-pos-1.xyz"));
        assert_eq!(positions_row(&snap).value, "(pending write)");
    }
}
