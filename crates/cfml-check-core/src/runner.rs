use crate::config::HarnessEnvironment;
use crate::domain::CheckError;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to resolve program path '{}': {source}", path.display())]
    Resolve {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("program '{}' has no control-file argument", program.display())]
    MissingArguments { program: PathBuf },
    #[error("failed to start '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("'{}' exited with {}: {}", program.display(), describe_exit(*code), stderr.trim())]
    Failed {
        program: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
    #[error("'{}' finished but did not produce '{}'", program.display(), output.display())]
    MissingOutput { program: PathBuf, output: PathBuf },
    #[error("failed to remove previous output '{}' before running '{}': {source}", output.display(), program.display())]
    ClearOutput {
        program: PathBuf,
        output: PathBuf,
        source: std::io::Error,
    },
}

impl From<RunnerError> for CheckError {
    fn from(error: RunnerError) -> Self {
        let message = error.to_string();
        match error {
            RunnerError::Resolve { .. } => CheckError::io_system("IO.RUNNER_RESOLVE", message),
            RunnerError::MissingArguments { .. } => {
                CheckError::input_validation("INPUT.RUNNER_ARGS", message)
            }
            RunnerError::Spawn { .. } => CheckError::external_program("RUN.RUNNER_SPAWN", message),
            RunnerError::Failed { .. } => CheckError::external_program("RUN.RUNNER_EXIT", message),
            RunnerError::MissingOutput { .. } => {
                CheckError::external_program("RUN.RUNNER_OUTPUT", message)
            }
            RunnerError::ClearOutput { .. } => {
                CheckError::io_system("IO.RUNNER_CLEAR_OUTPUT", message)
            }
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Appends the platform executable suffix when the path does not carry it.
pub fn with_platform_suffix(path: &Path, suffix: &str) -> PathBuf {
    if suffix.is_empty() {
        return path.to_path_buf();
    }

    let already_suffixed = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()));
    if already_suffixed {
        return path.to_path_buf();
    }

    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Splits the argument string and moves the first argument's directory into
/// the child's working directory so the program finds its control file by
/// name. Returns the working directory (if any) and the rewritten arguments.
pub fn split_control_argument(args: &str) -> (Option<PathBuf>, Vec<String>) {
    let mut tokens: Vec<String> = args.split_whitespace().map(str::to_string).collect();
    let Some(first) = tokens.first_mut() else {
        return (None, tokens);
    };

    let control = PathBuf::from(first.as_str());
    let working_dir = control
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf);
    if working_dir.is_some()
        && let Some(file_name) = control.file_name()
    {
        *first = file_name.to_string_lossy().into_owned();
    }
    (working_dir, tokens)
}

fn clear_previous_output(program: &Path, output: &Path) -> Result<(), RunnerError> {
    match fs::remove_file(output) {
        Ok(()) => {
            debug!(output = %output.display(), "removed previous output");
            Ok(())
        }
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RunnerError::ClearOutput {
            program: program.to_path_buf(),
            output: output.to_path_buf(),
            source,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRun {
    pub program: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub args: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// A compiled CrysFML program such as `Bond_StrN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProgram {
    path: PathBuf,
    settle: Duration,
}

impl ExternalProgram {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: with_platform_suffix(path.as_ref(), std::env::consts::EXE_SUFFIX),
            settle: Duration::ZERO,
        }
    }

    pub fn in_dir(programs_dir: impl AsRef<Path>, name: &str) -> Self {
        Self::new(programs_dir.as_ref().join(name))
    }

    /// Extra wait after the process exits, for tools that flush output late.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs the program to completion. `expected_outputs` left over from an
    /// earlier run are removed first, so each of them must be written by this
    /// run. A non-zero exit status or a missing output is an error; the harness
    /// working directory is left untouched.
    pub fn run(
        &self,
        args: &str,
        environment: &HarnessEnvironment,
        expected_outputs: &[PathBuf],
    ) -> Result<ProgramRun, RunnerError> {
        let program = self.resolved_path()?;
        let (working_dir, args) = split_control_argument(args);
        if args.is_empty() {
            return Err(RunnerError::MissingArguments { program });
        }

        for output in expected_outputs {
            clear_previous_output(&program, output)?;
        }

        let mut command = Command::new(&program);
        command.args(&args);
        if let Some(dir) = &working_dir {
            command.current_dir(dir);
        }
        environment.apply_to(&mut command);

        info!(
            program = %program.display(),
            args = ?args,
            working_dir = ?working_dir,
            "running external program"
        );
        let started = Instant::now();
        let output = command.output().map_err(|source| RunnerError::Spawn {
            program: program.clone(),
            source,
        })?;
        let elapsed = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        debug!(program = %program.display(), %stdout, %stderr, "external program output");

        if !output.status.success() {
            return Err(RunnerError::Failed {
                program,
                code: output.status.code(),
                stderr,
            });
        }

        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }

        if let Some(missing) = expected_outputs.iter().find(|path| !path.is_file()) {
            return Err(RunnerError::MissingOutput {
                program,
                output: missing.clone(),
            });
        }

        Ok(ProgramRun {
            program,
            working_dir,
            args,
            exit_code: output.status.code(),
            stdout,
            stderr,
            elapsed,
        })
    }

    fn resolved_path(&self) -> Result<PathBuf, RunnerError> {
        std::path::absolute(&self.path).map_err(|source| RunnerError::Resolve {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ExternalProgram, RunnerError, split_control_argument, with_platform_suffix};
    use crate::config::HarnessEnvironment;
    use std::path::{Path, PathBuf};

    fn bare_environment() -> HarnessEnvironment {
        HarnessEnvironment {
            project_dir: PathBuf::from("."),
            crysfml_db: None,
            plot_charts: false,
        }
    }

    #[test]
    fn platform_suffix_is_appended_once() {
        assert_eq!(
            with_platform_suffix(Path::new("progs/Bond_StrN"), ".exe"),
            PathBuf::from("progs/Bond_StrN.exe")
        );
        assert_eq!(
            with_platform_suffix(Path::new("progs/Bond_StrN.EXE"), ".exe"),
            PathBuf::from("progs/Bond_StrN.EXE")
        );
        assert_eq!(
            with_platform_suffix(Path::new("progs/Bond_StrN"), ""),
            PathBuf::from("progs/Bond_StrN")
        );
    }

    #[test]
    fn control_argument_moves_into_working_directory() {
        let (dir, args) = split_control_argument("tests/cfml/LiFePO4n.cfl -v");
        assert_eq!(dir, Some(PathBuf::from("tests/cfml")));
        assert_eq!(args, vec!["LiFePO4n.cfl".to_string(), "-v".to_string()]);

        let (dir, args) = split_control_argument("LiFePO4n.cfl");
        assert_eq!(dir, None);
        assert_eq!(args, vec!["LiFePO4n.cfl".to_string()]);

        let (dir, args) = split_control_argument("   ");
        assert_eq!(dir, None);
        assert!(args.is_empty());
    }

    #[test]
    fn empty_arguments_are_rejected_before_spawning() {
        let error = ExternalProgram::new("Bond_StrN")
            .run("", &bare_environment(), &[])
            .expect_err("no arguments");
        assert!(matches!(error, RunnerError::MissingArguments { .. }));
    }

    #[test]
    fn unknown_program_fails_to_spawn() {
        let temp = tempfile::TempDir::new().expect("tempdir should be created");
        let control = temp.path().join("ctl.cfl");
        let error = ExternalProgram::in_dir(temp.path(), "definitely-not-a-program")
            .run(&control.display().to_string(), &bare_environment(), &[])
            .expect_err("spawn failure");
        assert!(matches!(error, RunnerError::Spawn { .. }));
    }

    #[cfg(unix)]
    mod unix {
        use super::bare_environment;
        use crate::runner::{ExternalProgram, RunnerError};
        use std::fs;
        use std::path::PathBuf;
        use std::time::Duration;
        use tempfile::TempDir;

        #[test]
        fn program_runs_beside_its_control_file_and_output_is_checked() {
            let temp = TempDir::new().expect("tempdir should be created");
            let script = temp.path().join("make_output.sh");
            fs::write(&script, "echo \"1.0 2.0\" > result.dat\n").expect("write script");
            let cwd_before = std::env::current_dir().expect("cwd");

            let run = ExternalProgram::new("/bin/sh")
                .with_settle(Duration::from_millis(1))
                .run(
                    &script.display().to_string(),
                    &bare_environment(),
                    &[temp.path().join("result.dat")],
                )
                .expect("program should succeed");

            assert_eq!(run.exit_code, Some(0));
            assert_eq!(run.args, vec!["make_output.sh".to_string()]);
            assert_eq!(run.working_dir.as_deref(), Some(temp.path()));
            assert_eq!(
                fs::read_to_string(temp.path().join("result.dat")).expect("output"),
                "1.0 2.0\n"
            );
            assert_eq!(std::env::current_dir().expect("cwd"), cwd_before);
        }

        #[test]
        fn non_zero_exit_is_reported_with_stderr() {
            let temp = TempDir::new().expect("tempdir should be created");
            let script = temp.path().join("fail.sh");
            fs::write(&script, "echo 'no cfl' >&2\nexit 3\n").expect("write script");

            let error = ExternalProgram::new("/bin/sh")
                .run(&script.display().to_string(), &bare_environment(), &[])
                .expect_err("exit status");
            match error {
                RunnerError::Failed { code, stderr, .. } => {
                    assert_eq!(code, Some(3));
                    assert_eq!(stderr.trim(), "no cfl");
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn missing_declared_output_is_an_error() {
            let temp = TempDir::new().expect("tempdir should be created");
            let script = temp.path().join("quiet.sh");
            fs::write(&script, "exit 0\n").expect("write script");
            let expected: PathBuf = temp.path().join("LiFePO4n_sum.bvs");

            let error = ExternalProgram::new("/bin/sh")
                .run(
                    &script.display().to_string(),
                    &bare_environment(),
                    std::slice::from_ref(&expected),
                )
                .expect_err("missing output");
            assert!(matches!(error, RunnerError::MissingOutput { output, .. } if output == expected));
        }

        #[test]
        fn output_left_by_an_earlier_run_does_not_count() {
            let temp = TempDir::new().expect("tempdir should be created");
            let script = temp.path().join("complain.sh");
            fs::write(&script, "echo 'error reading cfl'\nexit 0\n").expect("write script");
            let stale = temp.path().join("LiFePO4n_sum.bvs");
            fs::write(&stale, "1.0 2.0\n").expect("seed previous output");

            let error = ExternalProgram::new("/bin/sh")
                .run(
                    &script.display().to_string(),
                    &bare_environment(),
                    std::slice::from_ref(&stale),
                )
                .expect_err("stale output must not satisfy the run");
            assert!(matches!(error, RunnerError::MissingOutput { output, .. } if output == stale));
            assert!(!stale.exists());
        }

        #[test]
        fn database_path_reaches_the_child_environment() {
            let temp = TempDir::new().expect("tempdir should be created");
            let script = temp.path().join("env.sh");
            fs::write(&script, "printf '%s' \"$CRYSFML_DB\" > db.txt\n").expect("write script");
            let mut environment = bare_environment();
            environment.crysfml_db = Some(PathBuf::from("/opt/cfml/Databases"));

            ExternalProgram::new("/bin/sh")
                .run(
                    &script.display().to_string(),
                    &environment,
                    &[temp.path().join("db.txt")],
                )
                .expect("program should succeed");
            assert_eq!(
                fs::read_to_string(temp.path().join("db.txt")).expect("db"),
                "/opt/cfml/Databases"
            );
        }
    }
}
