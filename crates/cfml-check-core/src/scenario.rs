//! Per-dataset scenarios: a powder pattern computed by the engine and checked
//! against a FullProf reference, or a CrysFML program whose output table is
//! checked against a stored one.

use crate::config::HarnessEnvironment;
use crate::domain::{
    CheckError, CheckResult, DEFAULT_EXPERIMENT_BLOCK, DEFAULT_INTENSITY_CEILING, EntryPoint,
    Pattern, ScanKind, StudyDocument,
};
use crate::engine::PatternEngine;
use crate::numerics::{
    ArrayComparison, RelativeTo, Tolerance, chi_squared, compare_arrays,
    compare_tables_relative_to, format_numeric,
};
use crate::parser::{ColumnarOptions, NumericTable, load_sub_pattern, read_columnar};
use crate::paths::{FixtureLayout, normalize_path};
use crate::plot::{chart_rows, write_chart};
use crate::runner::ExternalProgram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_MANIFEST_PATH: &str = "tasks/scenario-manifest.json";
pub const DEFAULT_SCENARIOS_ROOT: &str = "tests/functional_tests";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioManifest {
    #[serde(default)]
    pub scenarios: Vec<ScenarioSpec>,
}

impl ScenarioManifest {
    pub fn find(&self, id: &str) -> Option<&ScenarioSpec> {
        self.scenarios.iter().find(|scenario| scenario.id() == id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioSpec {
    PowderPattern(PowderPatternScenario),
    ProgramOutput(ProgramOutputScenario),
}

impl ScenarioSpec {
    pub fn id(&self) -> &str {
        match self {
            Self::PowderPattern(scenario) => &scenario.id,
            Self::ProgramOutput(scenario) => &scenario.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PowderPattern(_) => "powder_pattern",
            Self::ProgramOutput(_) => "program_output",
        }
    }

    pub fn directory(&self) -> &Path {
        match self {
            Self::PowderPattern(scenario) => &scenario.directory,
            Self::ProgramOutput(scenario) => &scenario.directory,
        }
    }
}

/// Where the reference pattern comes from and how to read it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ReferenceFile {
    Sub {
        file: String,
    },
    Columnar {
        file: String,
        #[serde(default)]
        options: ColumnarOptions,
    },
}

impl ReferenceFile {
    pub fn file(&self) -> &str {
        match self {
            Self::Sub { file } | Self::Columnar { file, .. } => file,
        }
    }

    /// Reads the reference as `(x, y)`. Columnar references use their first two
    /// selected columns.
    pub fn load(&self, path: &Path) -> CheckResult<Pattern> {
        match self {
            Self::Sub { .. } => Ok(load_sub_pattern(path)?),
            Self::Columnar { options, .. } => {
                let table = read_columnar(path, options)?;
                pattern_from_table(path, &table, options.unpack)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Chi2Expectation {
    pub expected: f64,
    pub decimal: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowderPatternScenario {
    pub id: String,
    /// Scenario directory, relative to the scenarios root.
    pub directory: PathBuf,
    /// Library entry point the engine is asked to exercise.
    #[serde(default)]
    pub entry: EntryPoint,
    pub scan: ScanKind,
    /// Study JSON under `input/`.
    pub input: String,
    /// Reference pattern under `desired/`.
    pub desired: ReferenceFile,
    /// Shift the reference x axis by the study's offset.
    #[serde(default = "default_true")]
    pub offset: bool,
    #[serde(default = "default_experiment_block")]
    pub experiment_block: String,
    #[serde(default)]
    pub skip_last: usize,
    #[serde(default = "default_intensity_ceiling")]
    pub normalize_ceiling: f64,
    #[serde(default)]
    pub chi2: Option<Chi2Expectation>,
    #[serde(default)]
    pub x_decimal: Option<u32>,
    #[serde(default)]
    pub y_decimal: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramOutputScenario {
    pub id: String,
    pub directory: PathBuf,
    /// Executable name under the programs directory.
    pub program: String,
    /// Control file under `input/`; the program runs beside it.
    pub control: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Stored table under `desired/`.
    pub desired: String,
    /// Table the program writes next to its control file.
    pub actual: String,
    #[serde(default)]
    pub options: ColumnarOptions,
    pub tolerance: Tolerance,
    /// Side the relative tolerance scales with; the program output unless
    /// stated otherwise.
    #[serde(default = "default_program_relative_to")]
    pub relative_to: RelativeTo,
    /// Other files the program must leave next to its control file.
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    #[serde(default)]
    pub settle_millis: u64,
}

fn default_true() -> bool {
    true
}

fn default_experiment_block() -> String {
    DEFAULT_EXPERIMENT_BLOCK.to_string()
}

fn default_program_relative_to() -> RelativeTo {
    RelativeTo::Actual
}

fn default_intensity_ceiling() -> f64 {
    DEFAULT_INTENSITY_CEILING
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario manifest '{}': {source}", path.display())]
    ReadManifest {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse scenario manifest '{}': {source}", path.display())]
    ParseManifest {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("scenario id '{id}' appears more than once in the manifest")]
    DuplicateId { id: String },
    #[error("no scenario named '{id}' in the manifest")]
    UnknownScenario { id: String },
    #[error("scenario '{id}' needs a pattern engine; pass --engine or set CFML_PATTERN_ENGINE")]
    MissingEngine { id: String },
}

impl From<ScenarioError> for CheckError {
    fn from(error: ScenarioError) -> Self {
        let message = error.to_string();
        match error {
            ScenarioError::ReadManifest { .. } => {
                CheckError::io_system("IO.SCENARIO_MANIFEST", message)
            }
            ScenarioError::ParseManifest { .. } | ScenarioError::DuplicateId { .. } => {
                CheckError::input_validation("INPUT.SCENARIO_MANIFEST", message)
            }
            ScenarioError::UnknownScenario { .. } => {
                CheckError::input_validation("INPUT.SCENARIO_UNKNOWN", message)
            }
            ScenarioError::MissingEngine { .. } => {
                CheckError::input_validation("INPUT.SCENARIO_ENGINE", message)
            }
        }
    }
}

pub fn load_manifest(path: impl AsRef<Path>) -> Result<ScenarioManifest, ScenarioError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ScenarioError::ReadManifest {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: ScenarioManifest =
        serde_json::from_str(&content).map_err(|source| ScenarioError::ParseManifest {
            path: path.to_path_buf(),
            source,
        })?;

    let mut seen = BTreeSet::new();
    for scenario in &manifest.scenarios {
        if !seen.insert(scenario.id()) {
            return Err(ScenarioError::DuplicateId {
                id: scenario.id().to_string(),
            });
        }
    }
    Ok(manifest)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    Scalar,
    Elementwise,
}

/// One pass/fail assertion of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    pub label: String,
    pub passed: bool,
    pub observed: String,
    pub expected: String,
    pub tolerance: Tolerance,
    pub mode: CheckMode,
    pub reason: Option<String>,
}

impl Check {
    pub fn scalar(label: &str, observed: f64, expected: f64, tolerance: Tolerance) -> Self {
        let passed = tolerance.passes(observed, expected);
        let reason = (!passed).then(|| {
            format!(
                "|{} - {}| outside {}",
                format_numeric(observed),
                format_numeric(expected),
                tolerance.describe()
            )
        });
        Self {
            label: label.to_string(),
            passed,
            observed: format_numeric(observed),
            expected: format_numeric(expected),
            tolerance,
            mode: CheckMode::Scalar,
            reason,
        }
    }

    pub fn elementwise(label: &str, comparison: &ArrayComparison) -> Self {
        Self {
            label: label.to_string(),
            passed: comparison.passed(),
            observed: format!(
                "{} value(s), max_abs_diff={}",
                comparison.actual_len,
                format_numeric(comparison.max_abs_diff)
            ),
            expected: format!("{} value(s)", comparison.desired_len),
            tolerance: comparison.tolerance,
            mode: CheckMode::Elementwise,
            reason: comparison.reason(),
        }
    }

    fn failed(label: &str, tolerance: Tolerance, mode: CheckMode, reason: String) -> Self {
        Self {
            label: label.to_string(),
            passed: false,
            observed: "n/a".to_string(),
            expected: "n/a".to_string(),
            tolerance,
            mode,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub scenario_id: String,
    pub kind: &'static str,
    pub passed: bool,
    pub chi2: Option<f64>,
    /// Wall time of the engine call or the external program.
    pub compute_seconds: f64,
    pub checks: Vec<Check>,
    pub reason: Option<String>,
    pub chart_path: Option<String>,
}

impl ScenarioReport {
    fn from_checks(
        spec: &ScenarioSpec,
        checks: Vec<Check>,
        chi2: Option<f64>,
        compute: Duration,
        chart_path: Option<String>,
    ) -> Self {
        let first_failure = checks.iter().find(|check| !check.passed);
        let reason = first_failure.map(|check| {
            format!(
                "{}: {}",
                check.label,
                check.reason.as_deref().unwrap_or("check failed")
            )
        });
        Self {
            scenario_id: spec.id().to_string(),
            kind: spec.kind(),
            passed: first_failure.is_none(),
            chi2,
            compute_seconds: compute.as_secs_f64(),
            checks,
            reason,
            chart_path,
        }
    }

    /// A scenario that could not be evaluated at all.
    pub fn errored(spec: &ScenarioSpec, error: &CheckError) -> Self {
        Self {
            scenario_id: spec.id().to_string(),
            kind: spec.kind(),
            passed: false,
            chi2: None,
            compute_seconds: 0.0,
            checks: Vec::new(),
            reason: Some(error.to_string()),
            chart_path: None,
        }
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|check| !check.passed)
    }
}

/// Everything a scenario needs besides its manifest entry.
#[derive(Clone, Copy)]
pub struct ScenarioContext<'a> {
    pub scenarios_root: &'a Path,
    pub programs_dir: &'a Path,
    pub environment: &'a HarnessEnvironment,
    pub engine: Option<&'a dyn PatternEngine>,
}

impl ScenarioContext<'_> {
    fn layout(&self, spec: &ScenarioSpec) -> FixtureLayout {
        FixtureLayout::new(self.scenarios_root.join(spec.directory()))
    }
}

/// Runs one scenario. `Err` means the scenario could not be evaluated (an
/// unreadable file, a failing program); failed assertions come back as a
/// report with `passed == false`.
pub fn run_scenario(spec: &ScenarioSpec, context: &ScenarioContext<'_>) -> CheckResult<ScenarioReport> {
    let report = match spec {
        ScenarioSpec::PowderPattern(scenario) => run_powder_pattern(spec, scenario, context)?,
        ScenarioSpec::ProgramOutput(scenario) => run_program_output(spec, scenario, context)?,
    };

    for check in report.failed_checks() {
        warn!(
            scenario = %report.scenario_id,
            check = %check.label,
            reason = check.reason.as_deref().unwrap_or("check failed"),
            "check failed"
        );
    }
    info!(
        scenario = %report.scenario_id,
        passed = report.passed,
        chi2 = ?report.chi2,
        compute_seconds = report.compute_seconds,
        "scenario finished"
    );
    Ok(report)
}

fn run_powder_pattern(
    spec: &ScenarioSpec,
    scenario: &PowderPatternScenario,
    context: &ScenarioContext<'_>,
) -> CheckResult<ScenarioReport> {
    let engine = context.engine.ok_or_else(|| ScenarioError::MissingEngine {
        id: scenario.id.clone(),
    })?;
    let layout = context.layout(spec);
    let study = StudyDocument::load(layout.input(&scenario.input))?;

    let started = Instant::now();
    let computed = engine.compute(scenario.entry, scenario.scan, &study)?;
    let compute = started.elapsed();
    let actual = computed.normalized(scenario.normalize_ceiling)?;

    let mut desired = scenario.desired.load(&layout.desired(scenario.desired.file()))?;
    if scenario.offset {
        desired = desired.shifted(study.x_offset(scenario.scan, &scenario.experiment_block)?);
    }
    let desired = desired.normalized(scenario.normalize_ceiling)?;

    let mut checks = Vec::new();
    let chi2 = match chi_squared(desired.y(), actual.y(), scenario.skip_last) {
        Ok(chi2) => {
            if let Some(expectation) = scenario.chi2 {
                checks.push(Check::scalar(
                    "chi2",
                    chi2,
                    expectation.expected,
                    Tolerance::decimal(expectation.decimal),
                ));
            }
            Some(chi2)
        }
        Err(error) => {
            let decimal = scenario.chi2.map_or(0, |expectation| expectation.decimal);
            checks.push(Check::failed(
                "chi2",
                Tolerance::decimal(decimal),
                CheckMode::Scalar,
                error.to_string(),
            ));
            None
        }
    };

    if let Some(decimal) = scenario.x_decimal {
        let comparison = compare_arrays(actual.x(), desired.x(), Tolerance::decimal(decimal));
        checks.push(Check::elementwise("x", &comparison));
    }

    if let Some(decimal) = scenario.y_decimal {
        let actual_prefix = actual.truncated(scenario.skip_last);
        let desired_prefix = desired.truncated(scenario.skip_last);
        let comparison = compare_arrays(
            actual_prefix.y(),
            desired_prefix.y(),
            Tolerance::decimal(decimal),
        );
        checks.push(Check::elementwise("y", &comparison));
    }

    let chart_path = if context.environment.plot_charts {
        let path = layout.actual(format!("{}.csv", scenario.id));
        write_chart(&path, &chart_rows(&desired, &actual, scenario.skip_last))?;
        Some(normalize_path(&path))
    } else {
        None
    };

    Ok(ScenarioReport::from_checks(spec, checks, chi2, compute, chart_path))
}

fn run_program_output(
    spec: &ScenarioSpec,
    scenario: &ProgramOutputScenario,
    context: &ScenarioContext<'_>,
) -> CheckResult<ScenarioReport> {
    let layout = context.layout(spec);
    let control = layout.input(&scenario.control);
    let actual_path = layout.input(&scenario.actual);

    let mut args = vec![control.display().to_string()];
    args.extend(scenario.extra_args.iter().cloned());
    let mut expected_outputs = vec![actual_path.clone()];
    expected_outputs.extend(scenario.expected_outputs.iter().map(|name| layout.input(name)));

    let program = ExternalProgram::in_dir(context.programs_dir, &scenario.program)
        .with_settle(Duration::from_millis(scenario.settle_millis));
    let run = program.run(&args.join(" "), context.environment, &expected_outputs)?;

    let desired = read_columnar(layout.desired(&scenario.desired), &scenario.options)?;
    let actual = read_columnar(&actual_path, &scenario.options)?;
    let comparison = compare_tables_relative_to(
        actual.rows(),
        desired.rows(),
        scenario.tolerance,
        scenario.relative_to,
    );
    let checks = vec![Check::elementwise(&scenario.actual, &comparison)];

    Ok(ScenarioReport::from_checks(spec, checks, None, run.elapsed, None))
}

fn pattern_from_table(path: &Path, table: &NumericTable, unpacked: bool) -> CheckResult<Pattern> {
    let axes = if unpacked {
        table.row(0).zip(table.row(1)).map(|(x, y)| (x.to_vec(), y.to_vec()))
    } else {
        table.column(0).zip(table.column(1))
    };

    let (x, y) = axes.ok_or_else(|| {
        CheckError::input_validation(
            "INPUT.REFERENCE_COLUMNS",
            format!(
                "reference '{}' needs at least two columns (x, y)",
                path.display()
            ),
        )
    })?;
    Pattern::new(x, y)
}
