#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn ship() -> Command {
    let mut cmd = Command::cargo_bin("ship").unwrap();
    cmd.env_remove("SHIPFLOW_CONFIG_PATH")
        .env_remove("SHIPFLOW_MASTER_KEY")
        .env_remove("SHIPFLOW_REGISTRY")
        .env_remove("SHIPFLOW_BUILD_TIMEOUT")
        .env_remove("SHIPFLOW_PUSH_TIMEOUT");
    cmd
}

/// テスト用のプロジェクトディレクトリを作成
fn project_with(yaml: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("shipflow.yaml"), yaml).unwrap();
    dir
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    ship()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("push"))
        .stdout(predicate::str::contains("version"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    ship()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shipflow"));
}

#[test]
fn test_build_help() {
    ship()
        .args(["build", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--push"))
        .stdout(predicate::str::contains("--build-arg"))
        .stdout(predicate::str::contains("--keep-going"))
        .stdout(predicate::str::contains("--jobs"));
}

#[test]
fn test_push_help() {
    ship()
        .args(["push", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--registry"))
        .stdout(predicate::str::contains("--strict-auth"))
        .stdout(predicate::str::contains("--push-timeout"));
}

#[test]
fn test_missing_config_path_fails() {
    let dir = TempDir::new().unwrap();
    ship()
        .current_dir(dir.path())
        .env("SHIPFLOW_CONFIG_PATH", dir.path().join("nope.yaml"))
        .arg("push")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SHIPFLOW_CONFIG_PATH"));
}

/// 不明なイメージ指定は Docker に接続する前にエラーになる
#[test]
fn test_unknown_image_filter_fails() {
    let dir = project_with(
        "images:\n  - name: acme/api\n    alias: api\n    build:\n      context: .\n",
    );

    ship()
        .current_dir(dir.path())
        .args(["build", "--image", "frontend"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("frontend"));
}

#[test]
fn test_duplicate_image_names_fail() {
    let dir = project_with("images:\n  - name: acme/api\n  - name: acme/api\n");

    ship()
        .current_dir(dir.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("acme/api"));
}

#[test]
fn test_invalid_build_arg_is_rejected() {
    ship()
        .args(["build", "--build-arg", "NOVALUE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_encrypt_password_requires_master_key() {
    ship()
        .args(["encrypt-password", "secret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SHIPFLOW_MASTER_KEY"));
}

#[test]
fn test_encrypt_password_with_generated_key() {
    let output = ship()
        .args(["encrypt-password", "--generate-key"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let key = String::from_utf8(output.stdout).unwrap();

    ship()
        .env("SHIPFLOW_MASTER_KEY", key.trim())
        .args(["encrypt-password", "secret"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{aes-gcm}"));
}

#[test]
fn test_encrypt_password_from_stdin() {
    let output = ship()
        .args(["encrypt-password", "--generate-key"])
        .output()
        .unwrap();
    let key = String::from_utf8(output.stdout).unwrap();

    ship()
        .env("SHIPFLOW_MASTER_KEY", key.trim())
        .arg("encrypt-password")
        .write_stdin("from-stdin\n")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{aes-gcm}"));
}

#[test]
fn test_invalid_timeout_is_rejected() {
    ship()
        .args(["push", "--push-timeout", "soon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--push-timeout"));
}
