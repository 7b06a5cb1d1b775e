use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const BVS_DESIRED: &str = "\
 Bond-valence sums
 Atom   BVS(e) ...
----------------------------------------------
 Li1  1.0(2)  0.98  0.02  1.10(1)  0.3  0.1  0.05
 Fe1  2.0(1)  1.97  0.03  2.05(2)  0.4  0.2  0.07
----------------------------------------------
 GII = 0.12
 Total =  3.0
 End
";

const SUB_PATTERN: &str = "10.0 0.05 10.2 PbSO4\n1.0 4.0 9.0\n4.0 1.0\n";

fn cfml_check(workspace: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_cfml-check"));
    command
        .current_dir(workspace)
        .env("GITHUB_WORKSPACE", workspace)
        .env_remove("CRYSFML_DB")
        .env_remove("PLOT_CHARTS_IN_TESTS")
        .env_remove("CFML_PATTERN_ENGINE")
        .env_remove("RUST_LOG");
    command
}

fn run(command: &mut Command) -> Output {
    command.output().expect("cfml-check should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir should be created");
    }
    fs::write(path, content).expect("file should be written");
}

#[test]
fn db_path_is_derived_from_scripts_config() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_file(
        &temp.path().join("scripts.toml"),
        "[cfml.dir]\nrepo = \"CFML\"\nrepo-src = \"Src\"\n",
    );

    let output = run(cfml_check(temp.path()).arg("db-path"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let printed = PathBuf::from(stdout(&output).trim());
    assert_eq!(printed, temp.path().join("CFML").join("Src").join("Databases"));
}

#[test]
fn db_path_prefers_explicit_environment() {
    let temp = TempDir::new().expect("tempdir should be created");
    let output = run(cfml_check(temp.path())
        .env("CRYSFML_DB", "/opt/crysfml/Databases")
        .arg("db-path"));

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "/opt/crysfml/Databases");
}

#[test]
fn db_path_without_any_source_is_an_input_error() {
    let temp = TempDir::new().expect("tempdir should be created");
    let output = run(cfml_check(temp.path()).arg("db-path"));

    assert_eq!(output.status.code(), Some(2));
    let stderr = stderr(&output);
    assert!(stderr.contains("ERROR: [INPUT.CLI_DB_PATH]"), "stderr: {stderr}");
    assert!(stderr.contains("FATAL EXIT CODE: 2"), "stderr: {stderr}");
}

#[test]
fn invalid_plot_flag_is_rejected() {
    let temp = TempDir::new().expect("tempdir should be created");
    let output = run(cfml_check(temp.path())
        .env("PLOT_CHARTS_IN_TESTS", "yes")
        .env("CRYSFML_DB", "/db")
        .arg("db-path"));

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("[INPUT.CONFIG]"));
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    let temp = TempDir::new().expect("tempdir should be created");
    let output = run(cfml_check(temp.path()).arg("plot"));

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("[INPUT.CLI_USAGE]"));
}

#[test]
fn chi2_of_a_pattern_against_itself_is_zero() {
    let temp = TempDir::new().expect("tempdir should be created");
    let desired = temp.path().join("pbso4_cw.sub");
    write_file(&desired, SUB_PATTERN);

    let output = run(cfml_check(temp.path()).arg("chi2").arg(&desired).arg(&desired));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("chi2: 0.0000"));
}

#[test]
fn chi2_against_an_expectation_fails_outside_the_decimal_tolerance() {
    let temp = TempDir::new().expect("tempdir should be created");
    let desired = temp.path().join("desired.sub");
    let actual = temp.path().join("actual.sub");
    write_file(&desired, SUB_PATTERN);
    // Normalized: desired [11.1, 44.4, 100, 44.4, 11.1], actual peaks at the same point.
    write_file(&actual, "10.0 0.05 10.2 PbSO4\n1.0 4.0 9.0\n4.0 2.0\n");

    let output = run(cfml_check(temp.path())
        .arg("chi2")
        .arg(&desired)
        .arg(&actual)
        .args(["--expected", "43.2", "--decimal", "1"]));
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("differs from expected"));

    let output = run(cfml_check(temp.path())
        .arg("chi2")
        .arg(&desired)
        .arg(&actual)
        .args(["--skip-last", "1", "--expected", "0", "--decimal", "1"]));
    assert!(output.status.success(), "stdout: {}", stdout(&output));
}

#[test]
fn chi2_decimal_needs_an_expectation() {
    let temp = TempDir::new().expect("tempdir should be created");
    let desired = temp.path().join("pbso4_cw.sub");
    write_file(&desired, SUB_PATTERN);

    let output = run(cfml_check(temp.path())
        .arg("chi2")
        .arg(&desired)
        .arg(&desired)
        .args(["--decimal", "2"]));
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("[INPUT.CLI_USAGE]"));
}

#[test]
fn inspect_reports_sub_and_columnar_shapes() {
    let temp = TempDir::new().expect("tempdir should be created");
    let sub = temp.path().join("pbso4_cw.sub");
    let bvs = temp.path().join("LiFePO4n_sum.bvs");
    write_file(&sub, SUB_PATTERN);
    write_file(&bvs, BVS_DESIRED);

    let output = run(cfml_check(temp.path())
        .arg("inspect")
        .arg(&sub)
        .args(["--format", "sub"]));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Points: x=5 y=5"));

    let output = run(cfml_check(temp.path())
        .arg("inspect")
        .arg(&bvs)
        .args(["--skip-begin", "3", "--skip-end", "4", "--columns", "1,2,3,4,5,6,7"]));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = stdout(&output);
    assert!(stdout.contains("Rows: 2"), "stdout: {stdout}");
    assert!(stdout.contains("Columns: 7"), "stdout: {stdout}");
}

#[test]
fn unknown_scenario_is_an_input_error() {
    let temp = TempDir::new().expect("tempdir should be created");
    let manifest = temp.path().join("manifest.json");
    write_file(&manifest, r#"{ "scenarios": [] }"#);

    let output = run(cfml_check(temp.path())
        .args(["scenario", "si_tof", "--manifest"])
        .arg(&manifest));
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("[INPUT.SCENARIO_UNKNOWN]"));
}

#[cfg(unix)]
mod unix {
    use super::{BVS_DESIRED, cfml_check, run, stderr, stdout, write_file};
    use serde_json::Value;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_executable(path: &Path, script: &str) {
        write_file(path, script);
        let mut permissions = fs::metadata(path).expect("metadata").permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(path, permissions).expect("chmod");
    }

    /// A Bond_StrN stand-in that writes its sum file next to the control file.
    fn write_program_workspace(root: &Path, output_body: &str) {
        write_file(
            &root.join("tasks/scenario-manifest.json"),
            r#"
            {
              "scenarios": [
                {
                  "kind": "program_output",
                  "id": "bond_strn_lifepo4n",
                  "directory": "cfml",
                  "program": "Bond_StrN",
                  "control": "LiFePO4n.cfl",
                  "desired": "LiFePO4n_sum_desired.bvs",
                  "actual": "LiFePO4n_sum.bvs",
                  "options": { "skipBegin": 3, "skipEnd": 4, "columns": [1, 2, 3, 4, 5, 6, 7] },
                  "tolerance": { "mode": "allclose", "rtol": 0.01 }
                }
              ]
            }
            "#,
        );
        write_file(
            &root.join("tests/functional_tests/cfml/input/LiFePO4n.cfl"),
            "TITLE LiFePO4n\n",
        );
        write_file(
            &root.join("tests/functional_tests/cfml/desired/LiFePO4n_sum_desired.bvs"),
            BVS_DESIRED,
        );
        write_file(&root.join("output.bvs"), output_body);
        write_executable(
            &root.join("dist/CFML/progs/Bond_StrN"),
            &format!(
                "#!/bin/sh\n[ -f \"$1\" ] || exit 9\ncp '{}' LiFePO4n_sum.bvs\n",
                root.join("output.bvs").display()
            ),
        );
    }

    #[test]
    fn regression_passes_when_program_output_matches() {
        let temp = TempDir::new().expect("tempdir should be created");
        write_program_workspace(temp.path(), &BVS_DESIRED.replace("0.98", "0.985"));

        let output = run(cfml_check(temp.path()).arg("regression"));
        assert!(
            output.status.success(),
            "stdout: {}\nstderr: {}",
            stdout(&output),
            stderr(&output)
        );
        assert!(stdout(&output).contains("Regression status: PASS"));

        let report_path = temp.path().join("artifacts/regression/report.json");
        let parsed: Value = serde_json::from_str(
            &fs::read_to_string(report_path).expect("report should be written"),
        )
        .expect("report should parse");
        assert_eq!(parsed["passed"], Value::Bool(true));
        assert_eq!(parsed["scenarios"][0]["kind"], "program_output");
        assert!(
            temp.path()
                .join("tests/functional_tests/cfml/input/LiFePO4n_sum.bvs")
                .is_file()
        );
    }

    #[test]
    fn regression_fails_when_program_output_drifts() {
        let temp = TempDir::new().expect("tempdir should be created");
        write_program_workspace(temp.path(), &BVS_DESIRED.replace("1.97", "2.10"));

        let output = run(cfml_check(temp.path())
            .arg("regression")
            .args(["--report", "out/report.json"]));
        assert_eq!(output.status.code(), Some(1));
        let stdout = stdout(&output);
        assert!(stdout.contains("Regression status: FAIL"), "stdout: {stdout}");
        assert!(stdout.contains("first failure: LiFePO4n_sum.bvs"), "stdout: {stdout}");
        assert!(temp.path().join("out/report.json").is_file());
    }

    #[test]
    fn regression_ignores_sum_file_from_an_earlier_run() {
        let temp = TempDir::new().expect("tempdir should be created");
        write_program_workspace(temp.path(), BVS_DESIRED);
        // Complains and exits 0 without writing anything.
        write_executable(
            &temp.path().join("dist/CFML/progs/Bond_StrN"),
            "#!/bin/sh\necho 'error reading LiFePO4n.cfl'\nexit 0\n",
        );
        let previous = temp
            .path()
            .join("tests/functional_tests/cfml/input/LiFePO4n_sum.bvs");
        write_file(&previous, BVS_DESIRED);

        let output = run(cfml_check(temp.path()).arg("regression"));
        assert_eq!(output.status.code(), Some(1));
        let stdout = stdout(&output);
        assert!(stdout.contains("Regression status: FAIL"), "stdout: {stdout}");
        assert!(stdout.contains("RUN.RUNNER_OUTPUT"), "stdout: {stdout}");
        assert!(!previous.exists());
    }

    #[test]
    fn powder_scenario_runs_through_an_external_engine_and_writes_a_chart() {
        let temp = TempDir::new().expect("tempdir should be created");
        let root = temp.path();
        write_file(
            &root.join("manifest.json"),
            r#"
            {
              "scenarios": [
                {
                  "kind": "powder_pattern",
                  "id": "si_tof",
                  "directory": "powder",
                  "entry": "json",
                  "scan": "tof",
                  "input": "si_tof.json",
                  "desired": { "format": "sub", "file": "si_tof.sub" },
                  "chi2": { "expected": 0.0, "decimal": 1 },
                  "xDecimal": 3
                }
              ]
            }
            "#,
        );
        write_file(
            &root.join("powder/input/si_tof.json"),
            r#"{ "experiments": [ { "NPD": { "_pd_meas_tof_offset": 5.0 } } ] }"#,
        );
        write_file(
            &root.join("powder/desired/si_tof.sub"),
            "1000.0 5.0 1010.0 Si\n2.0 8.0 4.0\n",
        );
        write_executable(
            &root.join("engine.sh"),
            "#!/bin/sh\n[ \"$2\" = json ] || exit 6\nprintf '1005.0 1.0\\n1010.0 4.0\\n1015.0 2.0\\n' > \"$8\"\n",
        );

        let output = run(cfml_check(root)
            .env("PLOT_CHARTS_IN_TESTS", "1")
            .args(["scenario", "si_tof", "--json", "--scenarios-root", "."])
            .arg("--manifest")
            .arg(root.join("manifest.json"))
            .arg("--engine")
            .arg(root.join("engine.sh")));
        assert!(
            output.status.success(),
            "stdout: {}\nstderr: {}",
            stdout(&output),
            stderr(&output)
        );

        let report: Value = serde_json::from_str(&stdout(&output)).expect("json report");
        assert_eq!(report["passed"], Value::Bool(true));
        assert_eq!(report["chi2"], 0.0);
        assert_eq!(report["checks"].as_array().map(Vec::len), Some(2));
        assert!(root.join("powder/actual/si_tof.csv").is_file());
    }

    #[test]
    fn powder_scenario_without_engine_reports_missing_engine() {
        let temp = TempDir::new().expect("tempdir should be created");
        write_file(
            &temp.path().join("tasks/scenario-manifest.json"),
            r#"{ "scenarios": [ { "kind": "powder_pattern", "id": "al2o3_tof",
                "directory": "powder", "scan": "tof", "input": "al2o3_tof.json",
                "desired": { "format": "sub", "file": "al2o3_tof.sim" } } ] }"#,
        );

        let output = run(cfml_check(temp.path()).args(["scenario", "al2o3_tof"]));
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("[INPUT.SCENARIO_ENGINE]"));
    }
}

#[test]
fn regression_with_unmatched_filter_is_an_input_error() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_file(
        &temp.path().join("tasks/scenario-manifest.json"),
        r#"{ "scenarios": [] }"#,
    );

    let output = run(cfml_check(temp.path()).args(["regression", "--filter", "pbso4_*"]));
    assert_eq!(output.status.code(), Some(2));
    let stderr = stderr(&output);
    assert!(stderr.contains("[INPUT.REGRESSION_FILTER]"), "stderr: {stderr}");

    let report: Option<Value> = fs::read_to_string(
        temp.path().join("artifacts/regression/report.json"),
    )
    .ok()
    .and_then(|content| serde_json::from_str(&content).ok());
    assert!(report.is_none(), "no report is written for an invalid selection");
}
