//! Integration tests for the sandpool CLI.
//!
//! These tests run the actual executable and check output and exit codes.
//! None of them need a Docker daemon: every command exercised here fails or
//! finishes before connecting.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the sandpool binary.
#[allow(deprecated)]
fn sandpool() -> Command {
    Command::cargo_bin("sandpool").expect("failed to find sandpool binary")
}

/// Creates a Command for sandpool running in a specific directory, isolated
/// from any user-level config.
fn sandpool_in(dir: &TempDir) -> Command {
    let mut cmd = sandpool();
    cmd.current_dir(dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("xdg"))
        .env("HOME", dir.path())
        .env_remove("SANDPOOL_CONFIG");
    cmd
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    sandpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandpool"))
        .stdout(predicate::str::contains("pull"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("batch"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_shows_version() {
    sandpool()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandpool"));
}

#[test]
fn test_exec_help_shows_all_options() {
    sandpool()
        .args(["exec", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--language"))
        .stdout(predicate::str::contains("--code"))
        .stdout(predicate::str::contains("--file"))
        .stdout(predicate::str::contains("--count"));
}

#[test]
fn test_exec_requires_code_or_file() {
    sandpool()
        .args(["exec", "--language", "python"])
        .assert()
        .failure();
}

#[test]
fn test_exec_rejects_code_and_file_together() {
    sandpool()
        .args(["exec", "-l", "python", "--code", "1", "--file", "x.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

// -----------------------------------------------------------------------------
// Config tests
// -----------------------------------------------------------------------------

#[test]
fn test_config_prints_defaults() {
    let dir = TempDir::new().unwrap();

    sandpool_in(&dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[pool]"))
        .stdout(predicate::str::contains("count_per_language = 2"))
        .stdout(predicate::str::contains("timeout_policy = \"replace\""))
        .stdout(predicate::str::contains("[languages.python]"))
        .stdout(predicate::str::contains("[languages.javascript]"));
}

#[test]
fn test_config_reads_project_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sandpool.toml"),
        r#"
[pool]
count_per_language = 3
timeout_policy = "reuse"

[languages.ruby]
image = "ruby:3.3-slim"
command = "ruby -e"
"#,
    )
    .unwrap();

    sandpool_in(&dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("count_per_language = 3"))
        .stdout(predicate::str::contains("timeout_policy = \"reuse\""))
        .stdout(predicate::str::contains("[languages.ruby]"))
        .stdout(predicate::str::contains("[languages.python]").not());
}

#[test]
fn test_count_flag_overrides_config() {
    let dir = TempDir::new().unwrap();

    sandpool_in(&dir)
        .args(["config", "--count", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("count_per_language = 5"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[pool]\ncount_per_language = 0\n").unwrap();

    sandpool_in(&dir)
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("count_per_language"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = TempDir::new().unwrap();

    sandpool_in(&dir)
        .args(["--config", "does-not-exist.toml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

// -----------------------------------------------------------------------------
// Exec and batch tests (no Docker needed)
// -----------------------------------------------------------------------------

#[test]
fn test_exec_unknown_language_fails_before_docker() {
    let dir = TempDir::new().unwrap();

    sandpool_in(&dir)
        .args(["exec", "--language", "cobol", "--code", "DISPLAY 'HI'"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported language: cobol"))
        .stderr(predicate::str::contains("python"));
}

#[test]
fn test_batch_invalid_job_file_fails() {
    let dir = TempDir::new().unwrap();
    let jobs = dir.path().join("jobs.jsonl");
    fs::write(&jobs, "{\"language\": \"python\"}\n").unwrap();

    sandpool_in(&dir)
        .arg("batch")
        .arg(&jobs)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid job on line 1"));
}

#[test]
fn test_batch_empty_job_file_succeeds() {
    let dir = TempDir::new().unwrap();
    let jobs = dir.path().join("jobs.jsonl");
    fs::write(&jobs, "\n\n").unwrap();

    sandpool_in(&dir)
        .arg("batch")
        .arg(&jobs)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
