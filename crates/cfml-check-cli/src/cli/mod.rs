mod commands;

use cfml_check_core::domain::CheckError;
use clap::Parser;
use tracing_subscriber::EnvFilter;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let check_error = error.as_check_error();
            eprintln!("{}", check_error.diagnostic_line());
            if let Some(summary_line) = check_error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            check_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("cfml-check".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();

    match Cli::try_parse_from(&full_args) {
        Ok(cli) => {
            init_tracing(cli.verbose);
            dispatch_parsed(cli.command)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

/// Logs go to stderr so command output on stdout stays parseable. `RUST_LOG`
/// takes precedence unless `--verbose` is given.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "cfml-check",
    about = "Functional checks for CrysFML programs and powder patterns"
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Run every manifest scenario and write a JSON report
    Regression(commands::RegressionArgs),
    /// Run a single scenario and print its checks
    Scenario(commands::ScenarioArgs),
    /// Parse a data file and print its shape
    Inspect(commands::InspectArgs),
    /// Chi-squared between two normalized .sub patterns
    Chi2(commands::Chi2Args),
    /// Print the CrysFML database directory derived from the environment
    DbPath,
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Regression(args) => commands::run_regression_command(args),
        CliCommand::Scenario(args) => commands::run_scenario_command(args),
        CliCommand::Inspect(args) => commands::run_inspect_command(args),
        CliCommand::Chi2(args) => commands::run_chi2_command(args),
        CliCommand::DbPath => commands::run_db_path_command(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(CheckError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_check_error(&self) -> CheckError {
        match self {
            Self::Usage(message) => CheckError::input_validation("INPUT.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => CheckError::internal("SYS.CLI", format!("{error:#}")),
        }
    }
}
