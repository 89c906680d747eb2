//! End-to-end tests for the `quill-autosave` binary

use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_quill-autosave"));
    cmd.env_remove("RUST_LOG").env_remove("QUILL_LOG");
    cmd
}

fn config_file(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn test_check_config_accepts_valid_file() {
    let file = config_file(
        "default_delay_ms = 250\npersist_timeout_ms = 2000\n\n[keys.outline]\ndelay_ms = 500\n",
    );
    let output = bin().arg("check-config").arg(file.path()).output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("default_delay_ms: 250"));
    assert!(stdout.contains("keys.outline.delay_ms: 500"));
}

#[test]
fn test_check_config_rejects_invalid_file() {
    let file = config_file("event_capacity = 0\n");
    let output = bin().arg("check-config").arg(file.path()).output().unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("event_capacity"));
}

#[test]
fn test_simulate_small_run_passes() {
    let output = bin()
        .args([
            "simulate",
            "--keys",
            "2",
            "--keystrokes",
            "30",
            "--typing-interval-ms",
            "2",
            "--delay-ms",
            "10",
            "--latency-ms",
            "5",
            "--jitter-ms",
            "5",
            "--json",
        ])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stdout));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["violations"].as_array().map(Vec::len), Some(0));
    assert_eq!(report["stats"]["submissions"], 30);
}
