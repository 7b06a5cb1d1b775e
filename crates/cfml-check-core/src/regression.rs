use crate::config::HarnessEnvironment;
use crate::domain::{CheckError, CheckResult};
use crate::engine::PatternEngine;
use crate::paths::normalize_path;
use crate::scenario::{
    ScenarioContext, ScenarioError, ScenarioReport, ScenarioSpec, load_manifest, run_scenario,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RegressionRunnerConfig {
    pub manifest_path: PathBuf,
    pub scenarios_root: PathBuf,
    pub programs_dir: PathBuf,
    pub report_path: PathBuf,
    /// Scenario id globs; empty selects every scenario.
    pub filters: Vec<String>,
}

impl RegressionRunnerConfig {
    pub fn for_project(project_dir: &Path) -> Self {
        Self {
            manifest_path: project_dir.join(crate::scenario::DEFAULT_MANIFEST_PATH),
            scenarios_root: project_dir.join(crate::scenario::DEFAULT_SCENARIOS_ROOT),
            programs_dir: crate::paths::programs_dir(project_dir),
            report_path: project_dir.join("artifacts/regression/report.json"),
            filters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegressionRunReport {
    pub generated_at_unix_seconds: u64,
    pub passed: bool,
    pub manifest_path: String,
    pub scenarios_root: String,
    pub programs_dir: String,
    pub engine: Option<String>,
    pub filters: Vec<String>,
    pub scenario_count: usize,
    pub passed_scenario_count: usize,
    pub failed_scenario_count: usize,
    pub check_count: usize,
    pub passed_check_count: usize,
    pub failed_check_count: usize,
    pub scenarios: Vec<ScenarioReport>,
}

impl RegressionRunReport {
    pub const fn exit_code(&self) -> i32 {
        if self.passed { 0 } else { 1 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegressionError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("invalid scenario filter '{pattern}': {source}")]
    Filter {
        pattern: String,
        source: globset::Error,
    },
    #[error("scenario filters {filters:?} match no scenario in the manifest")]
    EmptySelection { filters: Vec<String> },
    #[error("failed to create report directory '{}': {source}", path.display())]
    ReportDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize report '{}': {source}", path.display())]
    SerializeReport {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write report '{}': {source}", path.display())]
    WriteReport {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<RegressionError> for CheckError {
    fn from(error: RegressionError) -> Self {
        let message = error.to_string();
        match error {
            RegressionError::Scenario(source) => source.into(),
            RegressionError::Filter { .. } | RegressionError::EmptySelection { .. } => {
                CheckError::input_validation("INPUT.REGRESSION_FILTER", message)
            }
            RegressionError::ReportDirectory { .. } | RegressionError::WriteReport { .. } => {
                CheckError::io_system("IO.REGRESSION_FILESYSTEM", message)
            }
            RegressionError::SerializeReport { .. } => {
                CheckError::internal("SYS.REGRESSION_REPORT", message)
            }
        }
    }
}

/// Runs every selected scenario and writes the JSON report. A scenario that
/// cannot be evaluated is recorded as failed; the run continues.
pub fn run_regression(
    config: &RegressionRunnerConfig,
    environment: &HarnessEnvironment,
    engine: Option<&dyn PatternEngine>,
) -> CheckResult<RegressionRunReport> {
    let manifest = load_manifest(&config.manifest_path).map_err(RegressionError::from)?;
    let selected = select_scenarios(&manifest.scenarios, &config.filters)?;

    let context = ScenarioContext {
        scenarios_root: &config.scenarios_root,
        programs_dir: &config.programs_dir,
        environment,
        engine,
    };

    let mut scenario_reports = Vec::with_capacity(selected.len());
    for spec in selected {
        let report = match run_scenario(spec, &context) {
            Ok(report) => report,
            Err(error) => {
                warn!(scenario = spec.id(), error = %error, "scenario could not be evaluated");
                ScenarioReport::errored(spec, &error)
            }
        };
        scenario_reports.push(report);
    }

    let scenario_count = scenario_reports.len();
    let passed_scenario_count = scenario_reports
        .iter()
        .filter(|scenario| scenario.passed)
        .count();
    let failed_scenario_count = scenario_count.saturating_sub(passed_scenario_count);

    let check_count = scenario_reports
        .iter()
        .map(|scenario| scenario.checks.len())
        .sum::<usize>();
    let failed_check_count = scenario_reports
        .iter()
        .map(|scenario| scenario.failed_checks().count())
        .sum::<usize>();
    let passed_check_count = check_count.saturating_sub(failed_check_count);

    let report = RegressionRunReport {
        generated_at_unix_seconds: current_unix_timestamp_seconds(),
        passed: failed_scenario_count == 0,
        manifest_path: normalize_path(&config.manifest_path),
        scenarios_root: normalize_path(&config.scenarios_root),
        programs_dir: normalize_path(&config.programs_dir),
        engine: engine.map(|engine| engine.name().to_string()),
        filters: config.filters.clone(),
        scenario_count,
        passed_scenario_count,
        failed_scenario_count,
        check_count,
        passed_check_count,
        failed_check_count,
        scenarios: scenario_reports,
    };

    write_report_file(&config.report_path, &report)?;
    info!(
        passed = report.passed,
        scenarios = report.scenario_count,
        failed = report.failed_scenario_count,
        report = %config.report_path.display(),
        "regression finished"
    );
    Ok(report)
}

pub fn render_human_summary(report: &RegressionRunReport) -> String {
    let mut lines = Vec::new();
    let status = if report.passed { "PASS" } else { "FAIL" };
    lines.push(format!("Regression status: {status}"));
    lines.push(format!(
        "Scenarios: {} total ({} passed, {} failed)",
        report.scenario_count, report.passed_scenario_count, report.failed_scenario_count
    ));
    lines.push(format!(
        "Checks: {} total ({} passed, {} failed)",
        report.check_count, report.passed_check_count, report.failed_check_count
    ));

    for scenario in &report.scenarios {
        lines.push(render_scenario_line(scenario));
        if let Some(reason) = scenario.reason.as_deref().filter(|_| !scenario.passed) {
            lines.push(format!("  first failure: {reason}"));
        }
    }

    lines.join("\n")
}

/// `Scenario <id>: PASS (3/3 checks, chi2=43.2, compute=0.412s)`
pub fn render_scenario_line(scenario: &ScenarioReport) -> String {
    let status = if scenario.passed { "PASS" } else { "FAIL" };
    let passed_checks = scenario.checks.len() - scenario.failed_checks().count();
    let chi2 = scenario
        .chi2
        .map(|chi2| format!(", chi2={chi2:.2}"))
        .unwrap_or_default();
    format!(
        "Scenario {}: {} ({}/{} checks{}, compute={:.3}s)",
        scenario.scenario_id,
        status,
        passed_checks,
        scenario.checks.len(),
        chi2,
        scenario.compute_seconds
    )
}

pub fn select_scenarios<'a>(
    scenarios: &'a [ScenarioSpec],
    filters: &[String],
) -> Result<Vec<&'a ScenarioSpec>, RegressionError> {
    if filters.is_empty() {
        return Ok(scenarios.iter().collect());
    }

    let matcher = build_filter(filters)?;
    let selected: Vec<&ScenarioSpec> = scenarios
        .iter()
        .filter(|scenario| matcher.is_match(scenario.id()))
        .collect();
    if selected.is_empty() {
        return Err(RegressionError::EmptySelection {
            filters: filters.to_vec(),
        });
    }
    Ok(selected)
}

fn build_filter(filters: &[String]) -> Result<GlobSet, RegressionError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in filters {
        let glob = Glob::new(pattern).map_err(|source| RegressionError::Filter {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| RegressionError::Filter {
        pattern: filters.join(","),
        source,
    })
}

fn write_report_file(
    report_path: &Path,
    report: &RegressionRunReport,
) -> Result<(), RegressionError> {
    if let Some(parent_dir) = report_path.parent() {
        fs::create_dir_all(parent_dir).map_err(|source| RegressionError::ReportDirectory {
            path: parent_dir.to_path_buf(),
            source,
        })?;
    }

    let report_json = serde_json::to_string_pretty(report).map_err(|source| {
        RegressionError::SerializeReport {
            path: report_path.to_path_buf(),
            source,
        }
    })?;
    fs::write(report_path, report_json).map_err(|source| RegressionError::WriteReport {
        path: report_path.to_path_buf(),
        source,
    })
}

fn current_unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
