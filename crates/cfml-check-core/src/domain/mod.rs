pub mod errors;

pub use errors::{CheckError, CheckErrorCategory, CheckResult};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_INTENSITY_CEILING: f64 = 100.0;
pub const DEFAULT_EXPERIMENT_BLOCK: &str = "NPD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ScanKind {
    #[serde(rename = "cw")]
    ConstantWavelength,
    #[serde(rename = "tof")]
    TimeOfFlight,
}

impl ScanKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConstantWavelength => "cw",
            Self::TimeOfFlight => "tof",
        }
    }

    pub const fn offset_key(self) -> &'static str {
        match self {
            Self::ConstantWavelength => "_pd_meas_2theta_offset",
            Self::TimeOfFlight => "_pd_meas_tof_offset",
        }
    }
}

impl Display for ScanKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Library entry point that turns a study into a pattern: the dictionary
/// utilities (cw and tof) or the JSON-file utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    #[default]
    Dict,
    Json,
}

impl EntryPoint {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dict => "dict",
            Self::Json => "json",
        }
    }
}

impl Display for EntryPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// An x axis (2θ or time of flight) with its intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Pattern {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> CheckResult<Self> {
        if x.len() != y.len() {
            return Err(CheckError::input_validation(
                "INPUT.PATTERN_SHAPE",
                format!(
                    "pattern axes differ in length (x={}, y={})",
                    x.len(),
                    y.len()
                ),
            ));
        }
        Ok(Self { x, y })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.x, self.y)
    }

    /// Rescales intensities so the strongest point equals `ceiling`.
    pub fn normalized(&self, ceiling: f64) -> CheckResult<Self> {
        let max = self.y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() || max <= 0.0 {
            return Err(CheckError::comparison(
                "RUN.PATTERN_NORMALIZE",
                format!("cannot normalize a pattern whose maximum intensity is {max}"),
            ));
        }

        Ok(Self {
            x: self.x.clone(),
            y: self.y.iter().map(|value| value / max * ceiling).collect(),
        })
    }

    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            x: self.x.iter().map(|value| value + offset).collect(),
            y: self.y.clone(),
        }
    }

    /// Drops `skip_last` trailing points.
    pub fn truncated(&self, skip_last: usize) -> Self {
        let keep = self.len().saturating_sub(skip_last);
        Self {
            x: self.x[..keep].to_vec(),
            y: self.y[..keep].to_vec(),
        }
    }
}

/// JSON study/project description handed to the pattern engine untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyDocument {
    source_path: PathBuf,
    value: Value,
}

impl StudyDocument {
    pub fn load(path: impl AsRef<Path>) -> CheckResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| {
            CheckError::io_system(
                "IO.STUDY_READ",
                format!("failed to read study '{}': {}", path.display(), source),
            )
        })?;
        let value = serde_json::from_str(&content).map_err(|source| {
            CheckError::input_validation(
                "INPUT.STUDY_JSON",
                format!("failed to parse study '{}': {}", path.display(), source),
            )
        })?;
        Ok(Self {
            source_path: path.to_path_buf(),
            value,
        })
    }

    pub fn from_value(source_path: impl Into<PathBuf>, value: Value) -> Self {
        Self {
            source_path: source_path.into(),
            value,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Reads `experiments[0].<block>.<offset key>` for the given scan kind.
    pub fn x_offset(&self, scan: ScanKind, experiment_block: &str) -> CheckResult<f64> {
        let key = scan.offset_key();
        self.value
            .get("experiments")
            .and_then(|experiments| experiments.get(0))
            .and_then(|experiment| experiment.get(experiment_block))
            .and_then(|block| block.get(key))
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                CheckError::input_validation(
                    "INPUT.STUDY_OFFSET",
                    format!(
                        "study '{}' has no numeric experiments[0].{}.{}",
                        self.source_path.display(),
                        experiment_block,
                        key
                    ),
                )
            })
    }
}
