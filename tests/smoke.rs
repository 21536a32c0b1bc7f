//! Smoke tests -- verify the binary runs and the subcommands work end to end.

use assert_cmd::Command;
use predicates::prelude::*;

const EXAMPLE: &str = "10:24:12 WARN Failed login root from 203.0.113.45\n\
                       10:24:15 WARN Failed login root from 203.0.113.45\n\
                       10:24:18 WARN Failed login root from 203.0.113.45\n\
                       10:24:22 ERROR Failed login root from 203.0.113.45 - Account locked\n";

fn logwarden() -> Command {
    let mut cmd = Command::cargo_bin("logwarden").unwrap();
    // Keep the host's config and keys out of the tests.
    cmd.env("LOGWARDEN_CONFIG", "/nonexistent/logwarden.toml")
        .env_remove("OPENAI_API_KEY")
        .env_remove("SCALEDOWN_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    logwarden()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Security log anomaly detection"));
}

#[test]
fn test_cli_version() {
    logwarden()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("logwarden"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "detect", "compress", "analyze"] {
        logwarden().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_detect_from_file_json() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("auth.log");
    std::fs::write(&path, EXAMPLE).unwrap();

    let output = logwarden()
        .args(["detect", "--json", "--file"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["overall_threat_level"], "HIGH");
    assert_eq!(result["findings"][0]["type"], "brute_force");
}

#[test]
fn test_detect_from_stdin_report() {
    logwarden()
        .arg("detect")
        .write_stdin(EXAMPLE)
        .assert()
        .success()
        .stdout(predicate::str::contains("Overall threat level: HIGH"))
        .stdout(predicate::str::contains("203.0.113.45"));
}

#[test]
fn test_detect_fail_on_threshold() {
    logwarden()
        .args(["detect", "--fail-on", "high"])
        .write_stdin(EXAMPLE)
        .assert()
        .code(2);

    logwarden()
        .args(["detect", "--fail-on", "critical"])
        .write_stdin(EXAMPLE)
        .assert()
        .success();
}

#[test]
fn test_detect_rejects_binary_input() {
    logwarden()
        .arg("detect")
        .write_stdin(vec![0xffu8, 0xfe, 0x00, 0x41])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not valid UTF-8"));
}

#[test]
fn test_detect_ai_without_key_fails() {
    logwarden()
        .args(["detect", "--ai"])
        .write_stdin(EXAMPLE)
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn test_compress_json_stats() {
    let output = logwarden()
        .args(["compress", "--json"])
        .write_stdin(EXAMPLE)
        .output()
        .unwrap();
    assert!(output.status.success());
    let out: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(out["stats"]["mock"], true);
    assert!(out["stats"]["original_tokens"].as_u64().unwrap() > 0);
}

#[test]
fn test_config_file_is_honoured() {
    let dir = tempfile::TempDir::new().unwrap();
    let cfg = dir.path().join("logwarden.toml");
    std::fs::write(&cfg, "[detection]\nbrute_force_threshold = 10\n").unwrap();

    logwarden()
        .args(["detect", "--json", "--config"])
        .arg(&cfg)
        .write_stdin(EXAMPLE)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"overall_threat_level\": \"INFO\""));
}
