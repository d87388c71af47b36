use serde::de::{DeserializeOwned, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Scalar observables reported for one MD step.
///
/// Declaration order is the display/column order used by the dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    TimeFs,
    ConservedEnergy,
    CpuTimePerStep,
    CpuTimePerStepAvg,
    EnergyDriftInst,
    EnergyDriftAvg,
    PotentialInst,
    PotentialAvg,
    KineticInst,
    KineticAvg,
    TemperatureInst,
    TemperatureAvg,
    TotalEnergy,
    TotalEnergyAvg,
    OverlapEnergyCore,
    SelfEnergyCore,
    CoreHamiltonianEnergy,
    HartreeEnergy,
    ExchangeCorrelationEnergy,
    DispersionEnergy,
}

impl Field {
    pub const COUNT: usize = 20;

    pub const ALL: [Field; Field::COUNT] = [
        Field::TimeFs,
        Field::ConservedEnergy,
        Field::CpuTimePerStep,
        Field::CpuTimePerStepAvg,
        Field::EnergyDriftInst,
        Field::EnergyDriftAvg,
        Field::PotentialInst,
        Field::PotentialAvg,
        Field::KineticInst,
        Field::KineticAvg,
        Field::TemperatureInst,
        Field::TemperatureAvg,
        Field::TotalEnergy,
        Field::TotalEnergyAvg,
        Field::OverlapEnergyCore,
        Field::SelfEnergyCore,
        Field::CoreHamiltonianEnergy,
        Field::HartreeEnergy,
        Field::ExchangeCorrelationEnergy,
        Field::DispersionEnergy,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Key used in the snapshot file (`metrics` and `blocks`).
    pub fn key(self) -> &'static str {
        match self {
            Field::TimeFs => "time_fs",
            Field::ConservedEnergy => "conserved_energy",
            Field::CpuTimePerStep => "cpu_time_per_step",
            Field::CpuTimePerStepAvg => "cpu_time_per_step_avg",
            Field::EnergyDriftInst => "energy_drift_inst",
            Field::EnergyDriftAvg => "energy_drift_avg",
            Field::PotentialInst => "potential_inst",
            Field::PotentialAvg => "potential_avg",
            Field::KineticInst => "kinetic_inst",
            Field::KineticAvg => "kinetic_avg",
            Field::TemperatureInst => "temperature_inst",
            Field::TemperatureAvg => "temperature_avg",
            Field::TotalEnergy => "total_energy",
            Field::TotalEnergyAvg => "total_energy_avg",
            Field::OverlapEnergyCore => "overlap_energy_core",
            Field::SelfEnergyCore => "self_energy_core",
            Field::CoreHamiltonianEnergy => "core_hamiltonian_energy",
            Field::HartreeEnergy => "hartree_energy",
            Field::ExchangeCorrelationEnergy => "exchange_correlation_energy",
            Field::DispersionEnergy => "dispersion_energy",
        }
    }

    pub fn from_key(key: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.key() == key)
    }

    /// Short human label with units, for tables.
    pub fn label(self) -> &'static str {
        match self {
            Field::TimeFs => "Time [fs]",
            Field::ConservedEnergy => "Conserved E [Ha]",
            Field::CpuTimePerStep => "CPU time / step [s]",
            Field::CpuTimePerStepAvg => "CPU time / step avg [s]",
            Field::EnergyDriftInst => "Energy drift / atom [K]",
            Field::EnergyDriftAvg => "Energy drift avg [K]",
            Field::PotentialInst => "Potential E [Ha]",
            Field::PotentialAvg => "Potential E avg [Ha]",
            Field::KineticInst => "Kinetic E [Ha]",
            Field::KineticAvg => "Kinetic E avg [Ha]",
            Field::TemperatureInst => "Temperature [K]",
            Field::TemperatureAvg => "Temperature avg [K]",
            Field::TotalEnergy => "Total E [Ha]",
            Field::TotalEnergyAvg => "Total E avg [Ha]",
            Field::OverlapEnergyCore => "Overlap E core [Ha]",
            Field::SelfEnergyCore => "Self E core [Ha]",
            Field::CoreHamiltonianEnergy => "Core Hamiltonian E [Ha]",
            Field::HartreeEnergy => "Hartree E [Ha]",
            Field::ExchangeCorrelationEnergy => "XC E [Ha]",
            Field::DispersionEnergy => "Dispersion E [Ha]",
        }
    }
}

/// A sparse set of field values; also used as a partial update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fields([Option<f64>; Field::COUNT]);

impl Fields {
    pub fn get(&self, field: Field) -> Option<f64> {
        self.0[field.index()]
    }

    pub fn is_set(&self, field: Field) -> bool {
        self.0[field.index()].is_some()
    }

    pub fn set(&mut self, field: Field, value: f64) {
        self.0[field.index()] = Some(value);
    }

    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.set(field, value);
        self
    }

    /// Later non-null values overwrite; nothing is ever removed.
    pub fn merge(&mut self, other: &Fields) {
        for (field, value) in other.iter() {
            self.set(field, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, f64)> + '_ {
        Field::ALL
            .iter()
            .filter_map(|f| self.get(*f).map(|v| (*f, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

/// A block that has been opened but not finalized yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenRecord {
    pub step: Option<i64>,
    pub fields: Fields,
}

impl OpenRecord {
    pub fn new(step: Option<i64>) -> Self {
        Self {
            step,
            fields: Fields::default(),
        }
    }

    /// Close the block. Blocks without a step index are discarded.
    pub fn finalize(self) -> Option<TelemetryRecord> {
        let step = self.step?;
        let mut record = TelemetryRecord {
            step,
            fields: self.fields,
        };
        record.derive_totals();
        Some(record)
    }
}

/// One finalized MD step.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub step: i64,
    pub fields: Fields,
}

impl TelemetryRecord {
    pub fn get(&self, field: Field) -> Option<f64> {
        self.fields.get(field)
    }

    /// Fill `total_energy`/`total_energy_avg` from potential + kinetic when both
    /// operands exist and the total was not reported directly.
    pub fn derive_totals(&mut self) {
        let pairs = [
            (Field::TotalEnergy, Field::PotentialInst, Field::KineticInst),
            (Field::TotalEnergyAvg, Field::PotentialAvg, Field::KineticAvg),
        ];
        for (total, pot, kin) in pairs {
            if self.fields.is_set(total) {
                continue;
            }
            if let (Some(p), Some(k)) = (self.fields.get(pot), self.fields.get(kin)) {
                self.fields.set(total, p + k);
            }
        }
    }

    pub fn amend(&mut self, patch: &Fields) {
        self.fields.merge(patch);
    }

    /// Build a record from one `blocks` entry of a snapshot file. Unknown keys and
    /// non-numeric values are ignored; an entry without a step is rejected.
    pub fn from_json_map(map: &serde_json::Map<String, Value>) -> Option<Self> {
        let step = map.get("step").and_then(Value::as_f64)?.round() as i64;
        let mut fields = Fields::default();
        for (key, value) in map {
            if let (Some(field), Some(v)) = (Field::from_key(key), value.as_f64()) {
                fields.set(field, v);
            }
        }
        Some(Self { step, fields })
    }
}

impl Serialize for TelemetryRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let present = self.fields.iter().count();
        let mut map = serializer.serialize_map(Some(present + 1))?;
        map.serialize_entry("step", &self.step)?;
        for (field, value) in self.fields.iter() {
            map.serialize_entry(field.key(), &value)?;
        }
        map.end()
    }
}

/// Lifecycle of a supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Launching,
    Running,
    Completed,
    Failed(i32),
}

impl RunStatus {
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Failed(code)
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Launching => f.write_str("launching"),
            RunStatus::Running => f.write_str("running"),
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::Failed(code) => write!(f, "failed ({code})"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "launching" => return Ok(RunStatus::Launching),
            "running" => return Ok(RunStatus::Running),
            "completed" => return Ok(RunStatus::Completed),
            _ => {}
        }
        let code = s
            .strip_prefix("failed")
            .map(|rest| rest.trim().trim_start_matches('(').trim_end_matches(')').trim())
            .ok_or_else(|| format!("unknown status: {s}"))?;
        code.parse::<i32>()
            .map(RunStatus::Failed)
            .map_err(|_| format!("bad exit code in status: {s}"))
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Point-in-time copy of a run, shared by both renderers and the snapshot file.
///
/// Every field deserializes leniently: an absent, null or mistyped value falls back to
/// its default instead of rejecting the whole file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    #[serde(deserialize_with = "lenient")]
    pub project: String,
    #[serde(deserialize_with = "lenient")]
    pub logfile: String,
    #[serde(deserialize_with = "lenient")]
    pub input_path: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub profile: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub mode: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub status: Option<RunStatus>,
    #[serde(deserialize_with = "lenient")]
    pub started_at: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub runtime_seconds: f64,
    #[serde(deserialize_with = "lenient")]
    pub return_code: Option<i32>,
    #[serde(deserialize_with = "lenient")]
    pub pid: Option<u32>,
    #[serde(deserialize_with = "lenient")]
    pub tail: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub metrics: BTreeMap<String, Vec<Option<f64>>>,
    #[serde(deserialize_with = "lenient_blocks")]
    pub blocks: Vec<TelemetryRecord>,
}

impl Snapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.map(RunStatus::is_terminal).unwrap_or(false)
    }

    /// One metrics series by key (`"step"` or a [`Field::key`]); empty when absent.
    pub fn series(&self, key: &str) -> &[Option<f64>] {
        self.metrics.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn field_series(&self, field: Field) -> &[Option<f64>] {
        self.series(field.key())
    }

    pub fn step_count(&self) -> usize {
        self.blocks.len().max(self.series("step").len())
    }

    pub fn last_step(&self) -> Option<i64> {
        self.blocks.last().map(|b| b.step).or_else(|| {
            self.series("step")
                .iter()
                .rev()
                .flatten()
                .next()
                .map(|v| v.round() as i64)
        })
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_blocks<'de, D>(deserializer: D) -> Result<Vec<TelemetryRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let blocks = value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(TelemetryRecord::from_json_map)
                .collect()
        })
        .unwrap_or_default();
    Ok(blocks)
}

/// The line printed last on stdout by `cp2k-dash`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub project: String,
    pub logfile: String,
    pub return_code: i32,
}
