//! Streaming extraction of MD telemetry from CP2K text output.
//!
//! The extractor is a two-state machine (`Idle` / `Open`). It never buffers lines; each
//! recognised line is turned into a call on a [`TelemetrySink`], which owns the record
//! being built. The same machine serves the live supervisor (sink = `RunState`) and
//! offline replay (sink = [`RecordCollector`]).

use crate::model::{Field, Fields, OpenRecord, TelemetryRecord};

/// Receiver of the extractor's record transitions.
pub trait TelemetrySink {
    fn begin_record(&mut self, step: Option<i64>);
    fn set_record_fields(&mut self, fields: Fields);
    /// Close the open record; returns it when it carried a step index.
    fn finalize_record(&mut self) -> Option<TelemetryRecord>;
    /// Merge into the most recent finalized record (no-op if there is none).
    fn amend_latest_record(&mut self, fields: Fields);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Md,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    BlockEnd,
    BlockStart,
    Single(Field),
    Pair(Field, Field),
    TerminalFirst,
    TerminalLast,
}

struct Rule {
    scope: Scope,
    keys: &'static [&'static str],
    action: Action,
}

// First match wins.
const RULES: &[Rule] = &[
    Rule { scope: Scope::Md, keys: &["md| ***"], action: Action::BlockEnd },
    Rule { scope: Scope::Md, keys: &["step number"], action: Action::BlockStart },
    Rule { scope: Scope::Md, keys: &["time [fs]"], action: Action::Single(Field::TimeFs) },
    Rule {
        scope: Scope::Md,
        keys: &["conserved quantity"],
        action: Action::Single(Field::ConservedEnergy),
    },
    Rule {
        scope: Scope::Md,
        keys: &["cpu time per md step"],
        action: Action::Pair(Field::CpuTimePerStep, Field::CpuTimePerStepAvg),
    },
    Rule {
        scope: Scope::Md,
        keys: &["energy drift per atom"],
        action: Action::Pair(Field::EnergyDriftInst, Field::EnergyDriftAvg),
    },
    Rule {
        scope: Scope::Md,
        keys: &["potential energy"],
        action: Action::Pair(Field::PotentialInst, Field::PotentialAvg),
    },
    Rule {
        scope: Scope::Md,
        keys: &["kinetic energy"],
        action: Action::Pair(Field::KineticInst, Field::KineticAvg),
    },
    Rule {
        scope: Scope::Md,
        keys: &["temperature"],
        action: Action::Pair(Field::TemperatureInst, Field::TemperatureAvg),
    },
    Rule {
        scope: Scope::Other,
        keys: &["overlap energy of the core charge distribution"],
        action: Action::Single(Field::OverlapEnergyCore),
    },
    Rule {
        scope: Scope::Other,
        keys: &["self energy of the core charge distribution"],
        action: Action::Single(Field::SelfEnergyCore),
    },
    Rule {
        scope: Scope::Other,
        keys: &["core hamiltonian energy"],
        action: Action::Single(Field::CoreHamiltonianEnergy),
    },
    Rule {
        scope: Scope::Other,
        keys: &["hartree energy"],
        action: Action::Single(Field::HartreeEnergy),
    },
    Rule {
        scope: Scope::Other,
        keys: &["exchange-correlation energy"],
        action: Action::Single(Field::ExchangeCorrelationEnergy),
    },
    Rule {
        scope: Scope::Other,
        keys: &["dispersion energy"],
        action: Action::Single(Field::DispersionEnergy),
    },
    Rule { scope: Scope::Other, keys: &["total energy:"], action: Action::TerminalFirst },
    Rule {
        scope: Scope::Other,
        keys: &["energy|", "total force_eval"],
        action: Action::TerminalLast,
    },
];

fn classify(lower: &str) -> Option<Action> {
    let scope = if lower.starts_with("md|") {
        Scope::Md
    } else {
        Scope::Other
    };
    RULES
        .iter()
        .filter(|r| r.scope == scope)
        .find(|r| r.keys.iter().all(|k| lower.contains(k)))
        .map(|r| r.action)
}

/// Numeric tokens of a line, in order. Fortran `D`/`d` exponents are accepted; a token
/// must contain a digit and parse to a finite value.
pub fn parse_numbers(line: &str) -> Vec<f64> {
    line.split_whitespace()
        .filter(|tok| tok.bytes().any(|b| b.is_ascii_digit()))
        .filter_map(|tok| tok.replace(['D', 'd'], "E").parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    Idle,
    Open,
}

#[derive(Debug)]
pub struct Extractor {
    state: ExtractorState,
    written: [bool; Field::COUNT],
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            state: ExtractorState::Idle,
            written: [false; Field::COUNT],
        }
    }

    pub fn state(&self) -> ExtractorState {
        self.state
    }

    /// Consume one line. Returns the record finalized by this line, if any.
    pub fn feed<S: TelemetrySink + ?Sized>(
        &mut self,
        line: &str,
        sink: &mut S,
    ) -> Option<TelemetryRecord> {
        let lower = line.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }
        let action = classify(&lower)?;
        let open = self.state == ExtractorState::Open;

        match action {
            Action::BlockEnd => open.then(|| self.close(sink)).flatten(),
            Action::BlockStart => {
                let emitted = if open { self.close(sink) } else { None };
                let step = parse_numbers(line).last().map(|v| v.round() as i64);
                sink.begin_record(step);
                self.state = ExtractorState::Open;
                self.written = [false; Field::COUNT];
                emitted
            }
            Action::Single(field) => {
                if open {
                    if let Some(v) = parse_numbers(line).first() {
                        self.write(sink, &[(field, *v)]);
                    }
                }
                None
            }
            Action::Pair(inst, avg) => {
                if open {
                    let nums = parse_numbers(line);
                    match nums[..] {
                        [] => {}
                        [v] => self.write(sink, &[(inst, v)]),
                        [v, a, ..] => self.write(sink, &[(inst, v), (avg, a)]),
                    }
                }
                None
            }
            Action::TerminalFirst | Action::TerminalLast => {
                let nums = parse_numbers(line);
                let value = if action == Action::TerminalFirst {
                    nums.first()
                } else {
                    nums.last()
                };
                let value = *value?;
                if open {
                    self.write(sink, &[(Field::TotalEnergy, value)]);
                    self.close(sink)
                } else {
                    sink.amend_latest_record(Fields::default().with(Field::TotalEnergy, value));
                    None
                }
            }
        }
    }

    /// End of a finite input: emit a still-open block. Live streams never call this.
    pub fn finish<S: TelemetrySink + ?Sized>(&mut self, sink: &mut S) -> Option<TelemetryRecord> {
        if self.state == ExtractorState::Open {
            self.close(sink)
        } else {
            None
        }
    }

    fn write<S: TelemetrySink + ?Sized>(&mut self, sink: &mut S, values: &[(Field, f64)]) {
        let mut patch = Fields::default();
        for (field, value) in values {
            let slot = &mut self.written[*field as usize];
            if !*slot {
                *slot = true;
                patch.set(*field, *value);
            }
        }
        if !patch.is_empty() {
            sink.set_record_fields(patch);
        }
    }

    fn close<S: TelemetrySink + ?Sized>(&mut self, sink: &mut S) -> Option<TelemetryRecord> {
        self.state = ExtractorState::Idle;
        sink.finalize_record()
    }
}

/// In-memory sink collecting finalized records.
#[derive(Debug, Default)]
pub struct RecordCollector {
    open: Option<OpenRecord>,
    pub records: Vec<TelemetryRecord>,
}

impl TelemetrySink for RecordCollector {
    fn begin_record(&mut self, step: Option<i64>) {
        self.open = Some(OpenRecord::new(step));
    }

    fn set_record_fields(&mut self, fields: Fields) {
        self.open
            .get_or_insert_with(OpenRecord::default)
            .fields
            .merge(&fields);
    }

    fn finalize_record(&mut self) -> Option<TelemetryRecord> {
        let record = self.open.take()?.finalize()?;
        self.records.push(record.clone());
        Some(record)
    }

    fn amend_latest_record(&mut self, fields: Fields) {
        if let Some(last) = self.records.last_mut() {
            last.amend(&fields);
        }
    }
}

/// Run a finite sequence of lines through a fresh extractor, flushing at the end.
pub fn extract_all<I, L>(lines: I) -> Vec<TelemetryRecord>
where
    I: IntoIterator<Item = L>,
    L: AsRef<str>,
{
    let mut extractor = Extractor::new();
    let mut sink = RecordCollector::default();
    for line in lines {
        extractor.feed(line.as_ref(), &mut sink);
    }
    extractor.finish(&mut sink);
    sink.records
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.map(|a| (a - b).abs() < 1e-9).unwrap_or(false)
    }

    const STEP_12: &[&str] = &[
        " MD| Step number                                                   12",
        " MD| Time [fs]                                                  6.000000",
        " MD| Conserved quantity [hartree]                      -0.104583563D+02",
        " MD| Potential energy [hartree]              -10.5            -10.4",
        " MD| Kinetic energy [hartree]                 0.02             0.021",
        " MD| Temperature [K]                        300.1            298.7",
        " MD| ***************************************************************",
    ];

    #[test]
    fn full_block_with_derived_totals() {
        let records = extract_all(STEP_12);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.step, 12);
        assert!(approx(r.get(Field::TimeFs), 6.0));
        assert!(approx(r.get(Field::ConservedEnergy), -10.4583563));
        assert!(approx(r.get(Field::TotalEnergy), -10.48));
        assert!(approx(r.get(Field::TotalEnergyAvg), -10.379));
        assert!(approx(r.get(Field::TemperatureInst), 300.1));
        assert!(approx(r.get(Field::TemperatureAvg), 298.7));
    }

    #[test]
    fn terminal_line_closes_block_and_wins_over_derivation() {
        let lines = [
            " MD| Step number 3",
            " MD| Potential energy [hartree] -10.0 -10.0",
            " MD| Kinetic energy [hartree] 1.0 1.0",
            " ENERGY| Total FORCE_EVAL ( QS ) energy [a.u.]:  -7.25",
            " MD| Temperature [K] 300.0 300.0",
        ];
        let mut ex = Extractor::new();
        let mut sink = RecordCollector::default();
        let mut emitted = Vec::new();
        for l in lines {
            emitted.extend(ex.feed(l, &mut sink));
        }
        assert_eq!(emitted.len(), 1);
        assert!(approx(emitted[0].get(Field::TotalEnergy), -7.25));
        // Lines after the terminal line belong to no block.
        assert_eq!(emitted[0].get(Field::TemperatureInst), None);
        assert_eq!(ex.state(), ExtractorState::Idle);
    }

    #[test]
    fn idle_terminal_line_amends_latest_record() {
        let mut lines: Vec<&str> = STEP_12.to_vec();
        lines.push(" Total energy:    -10.999");
        let records = extract_all(lines);
        assert_eq!(records.len(), 1);
        assert!(approx(records[0].get(Field::TotalEnergy), -10.999));
    }

    #[test]
    fn idle_terminal_line_without_records_is_ignored() {
        let records = extract_all([" Total energy:    -10.999"]);
        assert!(records.is_empty());
    }

    #[test]
    fn consecutive_starts_close_previous_block() {
        let records = extract_all([
            " MD| Step number 1",
            " MD| Temperature [K] 10 11",
            " MD| Step number 2",
            " MD| Temperature [K] 20 21",
        ]);
        let steps: Vec<i64> = records.iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![1, 2]);
        assert!(approx(records[1].get(Field::TemperatureInst), 20.0));
    }

    #[test]
    fn first_write_wins_within_a_block() {
        let records = extract_all([
            " MD| Step number 1",
            " MD| Temperature [K] 10 11",
            " MD| Temperature [K] 99 99",
            " MD| ***",
        ]);
        assert!(approx(records[0].get(Field::TemperatureInst), 10.0));
    }

    #[test]
    fn single_value_lines_fill_instantaneous_fields() {
        let records = extract_all([
            " MD| Step number 4",
            " MD| Potential energy [hartree] -10.5",
            " MD| Kinetic energy [hartree] 0.25",
            " MD| Temperature [K] 301.0",
            " MD| ***",
        ]);
        let r = &records[0];
        assert!(approx(r.get(Field::PotentialInst), -10.5));
        assert!(approx(r.get(Field::KineticInst), 0.25));
        assert!(approx(r.get(Field::TemperatureInst), 301.0));
        assert!(approx(r.get(Field::TotalEnergy), -10.25));
        assert_eq!(r.get(Field::PotentialAvg), None);
        assert_eq!(r.get(Field::TotalEnergyAvg), None);
    }

    #[test]
    fn lines_outside_blocks_do_not_update_fields() {
        let records = extract_all([
            " MD| Temperature [K] 10 11",
            " Hartree energy:   -3.0",
            " MD| Step number 5",
            " MD| ***",
        ]);
        assert_eq!(records.len(), 1);
        assert!(records[0].fields.is_empty());
    }

    #[test]
    fn step_without_numeric_token_is_dropped() {
        let records = extract_all([
            " MD| Step number  n/a",
            " MD| Temperature [K] 10 11",
            " MD| ***",
        ]);
        assert!(records.is_empty());
    }

    #[test]
    fn live_mode_does_not_flush_open_block() {
        let mut ex = Extractor::new();
        let mut sink = RecordCollector::default();
        for l in &STEP_12[..5] {
            ex.feed(l, &mut sink);
        }
        assert!(sink.records.is_empty());
        assert_eq!(ex.state(), ExtractorState::Open);
    }

    #[test]
    fn energy_decomposition_lines() {
        let records = extract_all([
            " MD| Step number 1",
            "  Overlap energy of the core charge distribution:               0.00000007",
            "  Self energy of the core charge distribution:                -43.83753473",
            "  Core Hamiltonian energy:                                      12.8",
            "  Hartree energy:                                               17.7",
            "  Exchange-correlation energy:                                  -7.9",
            "  Dispersion energy:                                            -0.0042",
            "  Total energy:                                                -17.6",
        ]);
        let r = &records[0];
        assert!(approx(r.get(Field::OverlapEnergyCore), 0.00000007));
        assert!(approx(r.get(Field::SelfEnergyCore), -43.83753473));
        assert!(approx(r.get(Field::CoreHamiltonianEnergy), 12.8));
        assert!(approx(r.get(Field::HartreeEnergy), 17.7));
        assert!(approx(r.get(Field::ExchangeCorrelationEnergy), -7.9));
        assert!(approx(r.get(Field::DispersionEnergy), -0.0042));
        assert!(approx(r.get(Field::TotalEnergy), -17.6));
    }

    #[test]
    fn numeric_tokens() {
        assert_eq!(parse_numbers("a 1.5 b -2D+01 c 3d-1"), vec![1.5, -20.0, 0.3]);
        assert!(parse_numbers("MD| Temperature [K]").is_empty());
        assert!(parse_numbers("inf nan 1e999").is_empty());
    }

    #[derive(Debug, Clone)]
    enum Close {
        Marker,
        Terminal,
        NextStart,
    }

    fn block_lines(step: i64, close: &Close, last: bool) -> Vec<String> {
        let mut out = vec![
            format!(" MD| Step number {step}"),
            format!(" MD| Temperature [K] {}.5 {}.0", step, step),
        ];
        match close {
            Close::Marker => out.push(" MD| ****".to_string()),
            Close::Terminal => out.push(format!(" Total energy: -{step}.25")),
            Close::NextStart if last => out.push(" MD| ****".to_string()),
            Close::NextStart => {}
        }
        out
    }

    proptest! {
        #[test]
        fn every_terminated_block_is_emitted_once_in_order(
            closes in prop::collection::vec(
                prop_oneof![Just(Close::Marker), Just(Close::Terminal), Just(Close::NextStart)],
                0..20,
            ),
            noise in prop::collection::vec("[a-z ]{0,20}", 0..5),
        ) {
            let mut lines: Vec<String> = noise.clone();
            for (i, close) in closes.iter().enumerate() {
                lines.extend(block_lines(i as i64 + 1, close, i + 1 == closes.len()));
                lines.extend(noise.iter().cloned());
            }
            let mut ex = Extractor::new();
            let mut sink = RecordCollector::default();
            let mut emitted = Vec::new();
            for l in &lines {
                emitted.extend(ex.feed(l, &mut sink));
            }
            prop_assert!(ex.finish(&mut sink).is_none());
            let steps: Vec<i64> = emitted.iter().map(|r| r.step).collect();
            let expected: Vec<i64> = (1..=closes.len() as i64).collect();
            prop_assert_eq!(steps, expected);
        }
    }
}
