//! CLI Integration Tests for bmi-runner
//!
//! Runs the built binary against the fixture model library:
//! - Engine resolution failures and their diagnostics
//! - Running to the end time, from the command line and from bmi.toml
//! - JSON output of `inspect`

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn runner() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_bmi-runner"))
}

fn fixture() -> Option<PathBuf> {
    let path = env!("BMI_FIXTURE_LIB");
    if path.is_empty() {
        eprintln!("fixture model was not built, skipping");
        return None;
    }
    Some(PathBuf::from(path))
}

/// Run the binary in `dir` with an empty runner configuration
fn run_in(dir: &Path, args: &[&str]) -> Output {
    let settings = dir.join("bmi.toml");
    if !settings.exists() {
        fs::write(&settings, "").unwrap();
    }
    Command::new(runner())
        .current_dir(dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute bmi-runner")
}

fn write_model_config(dir: &Path, end_time: f64) -> PathBuf {
    let config = dir.join("model.ini");
    fs::write(
        &config,
        format!("start_time = 0\nend_time = {}\ntime_step = 1\n", end_time),
    )
    .unwrap();
    config
}

// ============================================================================
// Resolution Tests
// ============================================================================

#[test]
fn test_unknown_engine_reports_search_paths() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_in(dir.path(), &["run", "no_such_engine"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Library not found, looked in"),
        "stderr: {}",
        stderr
    );
    assert!(stderr.contains("libno_such_engine"));
}

#[test]
fn test_missing_engine_argument() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_in(dir.path(), &["inspect"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No engine given"), "stderr: {}", stderr);
}

// ============================================================================
// Run Tests
// ============================================================================

#[test]
fn test_run_to_end_time() {
    let Some(library) = fixture() else { return };
    let dir = tempfile::tempdir().unwrap();
    let config = write_model_config(dir.path(), 3.0);

    let output = run_in(
        dir.path(),
        &[
            "--log-level",
            "info",
            "run",
            library.to_str().unwrap(),
            config.to_str().unwrap(),
        ],
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {}", stderr);
    assert!(stderr.contains("Finished 3 steps"), "stderr: {}", stderr);
    // Forwarded from the library's own logger
    assert!(stderr.contains("reading "), "stderr: {}", stderr);
}

#[test]
fn test_run_from_settings_file() {
    let Some(library) = fixture() else { return };
    let dir = tempfile::tempdir().unwrap();
    write_model_config(dir.path(), 10.0);
    fs::write(
        dir.path().join("bmi.toml"),
        format!(
            "[model]\nengine = {:?}\nconfig = \"model.ini\"\n\n[run]\nend_time = 4.0\ntime_step = 2.0\nforward_native_logs = false\n",
            library.display().to_string()
        ),
    )
    .unwrap();

    let output = run_in(dir.path(), &["run"]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {}", stderr);
    assert!(stderr.contains("Finished 2 steps"), "stderr: {}", stderr);
    assert!(!stderr.contains("reading "), "stderr: {}", stderr);
}

// ============================================================================
// Inspect Tests
// ============================================================================

#[test]
fn test_inspect_prints_catalogue() {
    let Some(library) = fixture() else { return };
    let dir = tempfile::tempdir().unwrap();
    let config = write_model_config(dir.path(), 5.0);

    let output = run_in(
        dir.path(),
        &["inspect", library.to_str().unwrap(), config.to_str().unwrap()],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["end_time"], 5.0);
    assert_eq!(json["time_step"], 1.0);

    let variables = json["variables"].as_array().unwrap();
    assert_eq!(variables.len(), 5);
    assert_eq!(variables[1]["name"], "grid");
    assert_eq!(variables[1]["var_type"], "double");
    assert_eq!(variables[1]["shape"], serde_json::json!([3, 4]));
    assert_eq!(variables[4]["var_type"], "pump");

    let pump = &json["compounds"]["pump"];
    assert_eq!(pump["size"], 40);
    assert_eq!(pump["fields"][2]["name"], "levels");
    assert_eq!(pump["fields"][2]["offset"], 24);
}
