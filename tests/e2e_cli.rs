//! CLI end-to-end tests for the docforge binary.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[allow(deprecated)]
fn docforge_cmd() -> Command {
    Command::cargo_bin("docforge").unwrap()
}

#[test]
fn test_cli_no_args_shows_help() {
    docforge_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    docforge_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "docforge {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_cli_check_tools_command() {
    docforge_cmd()
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("soffice"))
        .stdout(predicate::str::contains("libreoffice"));
}

#[test]
fn test_cli_validate_defaults() {
    docforge_cmd()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("Server: 0.0.0.0:8080"));
}

#[test]
fn test_cli_validate_prints_warnings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("docforge.json");
    fs::write(
        &path,
        r#"{"pool": {"workers": 0, "max_attempts": 3}, "engine": {"timeout_secs": 0}}"#,
    )
    .unwrap();

    docforge_cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Max attempts: 3"))
        .stdout(predicate::str::contains("pool.workers is 0"))
        .stdout(predicate::str::contains("engine.timeout_secs is 0"));
}

#[test]
fn test_cli_validate_rejects_malformed_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();

    docforge_cmd()
        .args(["--config", path.to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config parse error"));
}

#[test]
fn test_cli_convert_missing_input() {
    docforge_cmd()
        .args(["convert", "/nonexistent/file.doc", "--to", "docx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[cfg(unix)]
#[test]
fn test_cli_convert_with_configured_engine() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    // Stand-in engine: copies the input to <outdir>/input.<target>.
    let engine = dir.path().join("fake-engine.sh");
    fs::write(&engine, "#!/bin/sh\ncp \"$1\" \"$2/input.$3\"\n").unwrap();
    fs::set_permissions(&engine, fs::Permissions::from_mode(0o755)).unwrap();

    let config = dir.path().join("docforge.json");
    fs::write(
        &config,
        serde_json::json!({
            "engine": {
                "program": engine,
                "args": ["{input}", "{outdir}", "{target}"],
                "timeout_secs": 10
            },
            "workspace": { "root": dir.path().join("ws") }
        })
        .to_string(),
    )
    .unwrap();

    let input = dir.path().join("letter.rtf");
    fs::write(&input, "{\\rtf1 hello}").unwrap();

    docforge_cmd()
        .args(["--config", config.to_str().unwrap(), "convert"])
        .arg(&input)
        .args(["--to", "odt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("letter.odt"));

    let output = dir.path().join("letter.odt");
    assert_eq!(fs::read_to_string(output).unwrap(), "{\\rtf1 hello}");
}
