//! CLI tests
//!
//! Drives the `stratus` binary end to end: config validation, deployment
//! against the sim engine, and error reporting with fix suggestions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn stratus() -> Command {
    Command::cargo_bin("stratus").unwrap()
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const COMPLETE_CONFIG: &str = "\
subscriptionid: sub-cli-test
vnetcidr: 10.0.0.0/16
subnetcidr: 10.0.0.0/24
";

#[test]
fn validate_accepts_complete_config() {
    let file = config_file(COMPLETE_CONFIG);

    stratus()
        .arg("validate")
        .arg("--config")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"))
        .stdout(predicate::str::contains("subscriptionid: sub-cli-test"));
}

#[test]
fn validate_reports_missing_key_with_fix() {
    let file = config_file("subscriptionid: sub-cli-test\n");

    stratus()
        .arg("validate")
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("STRAT-001"))
        .stderr(predicate::str::contains("--set key=value"));
}

#[test]
fn validate_accepts_set_overrides_without_file() {
    stratus()
        .args([
            "validate",
            "--set",
            "subscriptionid=sub-1",
            "--set",
            "vnetcidr=10.0.0.0/16",
            "--set",
            "subnetcidr=10.0.0.0/24",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn up_on_sim_engine_prints_oidc_export() {
    let file = config_file(COMPLETE_CONFIG);

    stratus()
        .arg("up")
        .arg("--config")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Using engine: sim"))
        .stdout(predicate::str::contains("oidc"))
        .stdout(predicate::str::contains("oic.prod-aks.azure.com"));
}

#[test]
fn up_rejects_unknown_engine() {
    let file = config_file(COMPLETE_CONFIG);

    stratus()
        .arg("up")
        .arg("--config")
        .arg(file.path())
        .arg("--engine")
        .arg("azure")
        .assert()
        .failure()
        .stderr(predicate::str::contains("STRAT-030"));
}

#[test]
fn up_rejects_malformed_override() {
    stratus()
        .args(["up", "--set", "not-a-pair"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("STRAT-003"));
}

#[test]
fn missing_config_file_reports_io_error() {
    stratus()
        .args(["validate", "--config", "/nonexistent/stack.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("IO error"));
}
