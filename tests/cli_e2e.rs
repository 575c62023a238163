//! Binary smoke tests: argument surface and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;

fn skillshelf() -> Command {
    Command::cargo_bin("skillshelf").expect("binary builds")
}

#[test]
fn help_lists_subcommands() {
    skillshelf()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("download"));
}

#[test]
fn version_prints_crate_version() {
    skillshelf()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_subcommand_is_usage_error() {
    skillshelf().assert().failure();
}

#[test]
fn download_without_manifests_exits_with_config_error() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    skillshelf()
        .current_dir(dir.path())
        .arg("download")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn discover_with_missing_skills_file_exits_with_config_error() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    skillshelf()
        .current_dir(dir.path())
        .args(["discover", "--skills-file", "no-such-file.json"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn invalid_config_file_exits_with_config_error() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let config_path = dir.path().join("config.json");
    std::fs::write(&config_path, br#"{"concurrency": 0}"#).expect("write config");

    skillshelf()
        .current_dir(dir.path())
        .args(["download", "--config", "config.json"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("concurrency"));
}
