use super::CliError;
use anyhow::Context;
use cfml_check_core::config::{CRYSFML_DB_ENV, HarnessEnvironment};
use cfml_check_core::domain::{CheckError, DEFAULT_INTENSITY_CEILING};
use cfml_check_core::engine::{CommandPatternEngine, PATTERN_ENGINE_ENV, PatternEngine};
use cfml_check_core::numerics::{Tolerance, chi_squared, format_numeric};
use cfml_check_core::parser::{ColumnarOptions, load_sub_pattern, read_columnar, read_sub};
use cfml_check_core::paths::programs_dir;
use cfml_check_core::regression::{
    RegressionRunnerConfig, render_human_summary, render_scenario_line, run_regression,
};
use cfml_check_core::scenario::{
    Check, DEFAULT_MANIFEST_PATH, DEFAULT_SCENARIOS_ROOT, ScenarioContext, ScenarioError,
    load_manifest, run_scenario,
};
use std::path::PathBuf;
use tracing::debug;

#[derive(clap::Args)]
pub(super) struct ScenarioSourceArgs {
    /// Scenario manifest path
    #[arg(long, default_value = DEFAULT_MANIFEST_PATH)]
    manifest: PathBuf,

    /// Root that scenario directories are relative to
    #[arg(long, default_value = DEFAULT_SCENARIOS_ROOT)]
    scenarios_root: PathBuf,

    /// Directory holding the compiled CrysFML programs [default: <project>/dist/CFML/progs]
    #[arg(long)]
    programs_dir: Option<PathBuf>,

    /// Pattern generator executable [default: $CFML_PATTERN_ENGINE]
    #[arg(long)]
    engine: Option<PathBuf>,
}

impl ScenarioSourceArgs {
    fn programs_dir(&self, environment: &HarnessEnvironment) -> PathBuf {
        self.programs_dir
            .clone()
            .unwrap_or_else(|| programs_dir(&environment.project_dir))
    }

    fn engine(&self, environment: &HarnessEnvironment) -> Option<CommandPatternEngine> {
        self.engine
            .clone()
            .or_else(|| std::env::var_os(PATTERN_ENGINE_ENV).map(PathBuf::from))
            .filter(|path| !path.as_os_str().is_empty())
            .map(|path| CommandPatternEngine::new(path, environment.clone()))
    }
}

#[derive(clap::Args)]
pub(super) struct RegressionArgs {
    #[command(flatten)]
    source: ScenarioSourceArgs,

    /// JSON report output path
    #[arg(long, default_value = "artifacts/regression/report.json")]
    report: PathBuf,

    /// Only run scenarios whose id matches this glob (repeatable)
    #[arg(long = "filter", value_name = "GLOB")]
    filters: Vec<String>,
}

#[derive(clap::Args)]
pub(super) struct ScenarioArgs {
    /// Scenario id from the manifest
    id: String,

    #[command(flatten)]
    source: ScenarioSourceArgs,

    /// Print the scenario report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(super) enum InspectFormat {
    Sub,
    Columnar,
}

#[derive(clap::Args)]
pub(super) struct InspectArgs {
    /// Data file to parse
    file: PathBuf,

    #[arg(long, value_enum, default_value_t = InspectFormat::Columnar)]
    format: InspectFormat,

    /// Leading lines to drop (columnar only)
    #[arg(long, default_value_t = 0)]
    skip_begin: usize,

    /// Trailing lines to drop (columnar only)
    #[arg(long, default_value_t = 0)]
    skip_end: usize,

    /// Zero-based columns to keep, comma separated (columnar only)
    #[arg(long, value_delimiter = ',')]
    columns: Vec<usize>,
}

#[derive(clap::Args)]
pub(super) struct Chi2Args {
    /// Reference .sub file
    desired: PathBuf,

    /// Computed .sub file
    actual: PathBuf,

    /// Trailing points excluded from the sum
    #[arg(long, default_value_t = 0)]
    skip_last: usize,

    /// Expected chi-squared; the command fails when outside --decimal
    #[arg(long)]
    expected: Option<f64>,

    /// Decimal places for the --expected comparison
    #[arg(long, default_value_t = 1, requires = "expected")]
    decimal: u32,
}

fn load_environment() -> Result<HarnessEnvironment, CliError> {
    let environment = HarnessEnvironment::from_process_env()
        .map_err(|error| CliError::Compute(error.into()))?;
    debug!(
        project_dir = %environment.project_dir.display(),
        crysfml_db = ?environment.crysfml_db,
        plot_charts = environment.plot_charts,
        "resolved harness environment"
    );
    Ok(environment)
}

pub(super) fn run_regression_command(args: RegressionArgs) -> Result<i32, CliError> {
    let environment = load_environment()?;
    let engine = args.source.engine(&environment);
    let config = RegressionRunnerConfig {
        programs_dir: args.source.programs_dir(&environment),
        manifest_path: args.source.manifest,
        scenarios_root: args.source.scenarios_root,
        report_path: args.report,
        filters: args.filters,
    };

    let report = run_regression(
        &config,
        &environment,
        engine.as_ref().map(|engine| engine as &dyn PatternEngine),
    )
    .map_err(CliError::Compute)?;
    println!("{}", render_human_summary(&report));
    println!("JSON report: {}", config.report_path.display());

    Ok(report.exit_code())
}

pub(super) fn run_scenario_command(args: ScenarioArgs) -> Result<i32, CliError> {
    let environment = load_environment()?;
    let manifest =
        load_manifest(&args.source.manifest).map_err(|error| CliError::Compute(error.into()))?;
    let spec = manifest.find(&args.id).ok_or_else(|| {
        CliError::Compute(
            ScenarioError::UnknownScenario {
                id: args.id.clone(),
            }
            .into(),
        )
    })?;

    let engine = args.source.engine(&environment);
    let programs_dir = args.source.programs_dir(&environment);
    let context = ScenarioContext {
        scenarios_root: &args.source.scenarios_root,
        programs_dir: &programs_dir,
        environment: &environment,
        engine: engine.as_ref().map(|engine| engine as &dyn PatternEngine),
    };
    let report = run_scenario(spec, &context).map_err(CliError::Compute)?;

    if args.json {
        let rendered = serde_json::to_string_pretty(&report)
            .with_context(|| format!("failed to render report for scenario '{}'", args.id))?;
        println!("{rendered}");
    } else {
        println!("{}", render_scenario_line(&report));
        for check in &report.checks {
            println!("  {}", render_check_line(check));
        }
        if let Some(chart_path) = &report.chart_path {
            println!("Chart: {chart_path}");
        }
    }

    Ok(if report.passed { 0 } else { 1 })
}

fn render_check_line(check: &Check) -> String {
    let status = if check.passed { "PASS" } else { "FAIL" };
    let mut line = format!(
        "{} {}: observed {}, expected {} ({})",
        status,
        check.label,
        check.observed,
        check.expected,
        check.tolerance.describe()
    );
    if let Some(reason) = check.reason.as_deref().filter(|_| !check.passed) {
        line.push_str(&format!(" - {reason}"));
    }
    line
}

pub(super) fn run_inspect_command(args: InspectArgs) -> Result<i32, CliError> {
    match args.format {
        InspectFormat::Sub => {
            let (x, y) = read_sub(&args.file).map_err(|error| CliError::Compute(error.into()))?;
            println!("Format: sub");
            println!("Points: x={} y={}", x.len(), y.len());
            if let (Some(first), Some(last)) = (x.first(), x.last()) {
                println!(
                    "x range: {} .. {}",
                    format_numeric(*first),
                    format_numeric(*last)
                );
            }
            if x.len() != y.len() {
                eprintln!(
                    "WARNING: [RUN.SUB_LENGTH] x grid and intensity body differ in length"
                );
            }
        }
        InspectFormat::Columnar => {
            let mut options = ColumnarOptions::skipping(args.skip_begin, args.skip_end);
            if !args.columns.is_empty() {
                options = options.with_columns(args.columns);
            }
            let table = read_columnar(&args.file, &options)
                .map_err(|error| CliError::Compute(error.into()))?;
            println!("Format: columnar");
            println!("Rows: {}", table.row_count());
            println!("Columns: {}", table.column_count());
        }
    }
    Ok(0)
}

pub(super) fn run_chi2_command(args: Chi2Args) -> Result<i32, CliError> {
    let normalized = |path: &PathBuf| -> Result<_, CheckError> {
        load_sub_pattern(path)?.normalized(DEFAULT_INTENSITY_CEILING)
    };
    let desired = normalized(&args.desired).map_err(CliError::Compute)?;
    let actual = normalized(&args.actual).map_err(CliError::Compute)?;

    let chi2 = chi_squared(desired.y(), actual.y(), args.skip_last)
        .map_err(|error| CliError::Compute(error.into()))?;
    println!("chi2: {chi2:.4}");

    let Some(expected) = args.expected else {
        return Ok(0);
    };
    let tolerance = Tolerance::decimal(args.decimal);
    if tolerance.passes(chi2, expected) {
        Ok(0)
    } else {
        println!(
            "chi2 {} differs from expected {} ({})",
            format_numeric(chi2),
            format_numeric(expected),
            tolerance.describe()
        );
        Ok(1)
    }
}

pub(super) fn run_db_path_command() -> Result<i32, CliError> {
    let environment = load_environment()?;
    let database = environment.crysfml_db.ok_or_else(|| {
        CliError::Compute(CheckError::input_validation(
            "INPUT.CLI_DB_PATH",
            format!(
                "{CRYSFML_DB_ENV} is not set and no scripts.toml was found in '{}'",
                environment.project_dir.display()
            ),
        ))
    })?;
    println!("{}", database.display());
    Ok(0)
}
