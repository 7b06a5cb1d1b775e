use crate::config::HarnessEnvironment;
use crate::domain::{CheckError, CheckResult, EntryPoint, Pattern, ScanKind, StudyDocument};
use crate::parser::{ColumnarOptions, read_columnar};
use crate::runner::{RunnerError, with_platform_suffix};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::debug;

pub const PATTERN_ENGINE_ENV: &str = "CFML_PATTERN_ENGINE";

const STUDY_FILE: &str = "study.json";
const PATTERN_FILE: &str = "pattern.xy";

/// Computes a powder pattern from a study document. The physics lives behind
/// this seam; the harness only consumes the resulting `(x, y)` pair.
pub trait PatternEngine {
    fn name(&self) -> &str;

    fn compute(
        &self,
        entry: EntryPoint,
        scan: ScanKind,
        study: &StudyDocument,
    ) -> CheckResult<Pattern>;
}

/// Runs an external pattern generator:
/// `<program> --entry dict|json --scan cw|tof --study <json> --output <xy>`,
/// where the output is a two-column `x y` table.
#[derive(Debug, Clone)]
pub struct CommandPatternEngine {
    program: PathBuf,
    environment: HarnessEnvironment,
}

impl CommandPatternEngine {
    pub fn new(program: impl AsRef<Path>, environment: HarnessEnvironment) -> Self {
        Self {
            program: with_platform_suffix(program.as_ref(), std::env::consts::EXE_SUFFIX),
            environment,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run_generator(
        &self,
        entry: EntryPoint,
        scan: ScanKind,
        study_path: &Path,
        output_path: &Path,
    ) -> Result<(), RunnerError> {
        let mut command = Command::new(&self.program);
        command
            .arg("--entry")
            .arg(entry.as_str())
            .arg("--scan")
            .arg(scan.as_str())
            .arg("--study")
            .arg(study_path)
            .arg("--output")
            .arg(output_path);
        self.environment.apply_to(&mut command);

        let output = command.output().map_err(|source| RunnerError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(RunnerError::Failed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        if !output_path.is_file() {
            return Err(RunnerError::MissingOutput {
                program: self.program.clone(),
                output: output_path.to_path_buf(),
            });
        }
        Ok(())
    }
}

impl PatternEngine for CommandPatternEngine {
    fn name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("pattern-engine")
    }

    fn compute(
        &self,
        entry: EntryPoint,
        scan: ScanKind,
        study: &StudyDocument,
    ) -> CheckResult<Pattern> {
        let scratch = TempDir::new().map_err(|source| {
            CheckError::io_system(
                "IO.ENGINE_SCRATCH",
                format!("failed to create engine scratch directory: {source}"),
            )
        })?;
        let study_path = scratch.path().join(STUDY_FILE);
        let output_path = scratch.path().join(PATTERN_FILE);

        let serialized = serde_json::to_string(study.value()).map_err(|source| {
            CheckError::internal(
                "SYS.ENGINE_STUDY",
                format!("failed to serialize study '{}': {source}", study.source_path().display()),
            )
        })?;
        fs::write(&study_path, serialized).map_err(|source| {
            CheckError::io_system(
                "IO.ENGINE_STUDY",
                format!("failed to write '{}': {source}", study_path.display()),
            )
        })?;

        debug!(
            engine = %self.program.display(),
            %entry,
            %scan,
            study = %study.source_path().display(),
            "computing pattern"
        );
        self.run_generator(entry, scan, &study_path, &output_path)?;

        let table = read_columnar(&output_path, &ColumnarOptions::default().with_columns([0, 1]))?;
        let (x, y): (Vec<f64>, Vec<f64>) = table.rows().iter().map(|row| (row[0], row[1])).unzip();
        Pattern::new(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandPatternEngine, PatternEngine};
    use crate::config::HarnessEnvironment;
    use crate::domain::{CheckErrorCategory, EntryPoint, ScanKind, StudyDocument};
    use serde_json::json;
    use std::path::PathBuf;

    fn environment() -> HarnessEnvironment {
        HarnessEnvironment {
            project_dir: PathBuf::from("."),
            crysfml_db: None,
            plot_charts: false,
        }
    }

    #[test]
    fn missing_generator_is_an_external_program_error() {
        let temp = tempfile::TempDir::new().expect("tempdir should be created");
        let engine = CommandPatternEngine::new(temp.path().join("no-generator"), environment());
        let study = StudyDocument::from_value("inline.json", json!({ "experiments": [] }));

        let error = engine
            .compute(EntryPoint::Dict, ScanKind::ConstantWavelength, &study)
            .expect_err("spawn failure");
        assert_eq!(error.category(), CheckErrorCategory::ExternalProgramError);
        assert_eq!(engine.name(), "no-generator");
    }

    #[cfg(unix)]
    #[test]
    fn generator_output_is_read_back_as_a_pattern() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().expect("tempdir should be created");
        let generator = temp.path().join("fake-generator");
        fs::write(
            &generator,
            "#!/bin/sh\n\
             # --entry <entry> --scan <kind> --study <json> --output <xy>\n\
             [ \"$2\" = dict ] || exit 6\n\
             [ \"$4\" = tof ] || exit 7\n\
             grep -q NPD \"$6\" || exit 8\n\
             printf '1000.0 2.0\\n1005.0 4.0\\n1010.0 1.0\\n' > \"$8\"\n",
        )
        .expect("write generator");
        let mut permissions = fs::metadata(&generator).expect("metadata").permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&generator, permissions).expect("chmod");

        let engine = CommandPatternEngine::new(&generator, environment());
        let study = StudyDocument::from_value(
            "si_tof.json",
            json!({ "experiments": [{ "NPD": { "_pd_meas_tof_offset": 0.0 } }] }),
        );
        let pattern = engine
            .compute(EntryPoint::Dict, ScanKind::TimeOfFlight, &study)
            .expect("pattern");

        assert_eq!(pattern.x(), &[1000.0, 1005.0, 1010.0]);
        assert_eq!(pattern.y(), &[2.0, 4.0, 1.0]);

        let error = engine
            .compute(EntryPoint::Json, ScanKind::TimeOfFlight, &study)
            .expect_err("generator only accepts the dict entry");
        assert_eq!(error.code(), "RUN.RUNNER_EXIT");
    }
}
