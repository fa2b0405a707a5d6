//! Integration tests for the `hygrolink` CLI binary.
//!
//! These tests validate argument parsing, help output, shell completions,
//! config management, and one-shot commands against a mock server.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `hygrolink` binary with env isolation.
///
/// Clears all `HYGROLINK_*` env vars and points the config file at
/// `config` so tests never touch the user's real configuration.
fn hygrolink_cmd(config: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("hygrolink");
    cmd.env("HYGROLINK_CONFIG", config)
        .env("HOME", "/tmp/hygrolink-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/hygrolink-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("HYGROLINK_PROFILE")
        .env_remove("HYGROLINK_SERVER")
        .env_remove("HYGROLINK_OUTPUT")
        .env_remove("HYGROLINK_INSECURE")
        .env_remove("HYGROLINK_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

fn temp_config() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    (dir, path)
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn device(id: &str, humidity: f64, alert: bool) -> serde_json::Value {
    json!({
        "device_id": id,
        "humidity": humidity,
        "temperature": 21.5,
        "alert": alert,
        "message": if alert { "humidity too high" } else { "" },
        "last_updated": "2025-01-10T12:00:00.123456789Z",
    })
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let (_dir, config) = temp_config();
    let output = hygrolink_cmd(&config).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    let (_dir, config) = temp_config();
    hygrolink_cmd(&config).arg("--help").assert().success().stdout(
        predicate::str::contains("sensor servers")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("latest"))
            .and(predicate::str::contains("watch")),
    );
}

#[test]
fn test_version_flag() {
    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hygrolink"));
}

#[test]
fn test_invalid_subcommand() {
    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .arg("thermostat")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_invalid_output_format() {
    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .args(["devices", "--output", "xml"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_latest_requires_device() {
    let (_dir, config) = temp_config();
    hygrolink_cmd(&config).arg("latest").assert().failure().code(2);
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_no_config_fails_with_hint() {
    let (_dir, config) = temp_config();
    let output = hygrolink_cmd(&config).arg("devices").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No server configured"), "stderr:\n{stderr}");
    assert!(stderr.contains("config init"), "stderr:\n{stderr}");
}

#[test]
fn test_unknown_profile() {
    let (_dir, config) = temp_config();
    let output = hygrolink_cmd(&config)
        .args(["devices", "--profile", "office"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Profile 'office' not found"), "stderr:\n{stderr}");
}

#[test]
fn test_config_path_honors_env() {
    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(config.display().to_string()));
}

#[test]
fn test_config_init_then_show() {
    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .args([
            "config",
            "init",
            "--name",
            "home",
            "--server",
            "http://10.0.0.5:8080",
            "--device",
            "esp32-livingroom",
            "--reconnect-delay",
            "3s",
        ])
        .assert()
        .success();

    let output = hygrolink_cmd(&config)
        .args(["config", "show", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["default_profile"], "home");
    assert_eq!(shown["profiles"]["home"]["server"], "http://10.0.0.5:8080");
    assert_eq!(shown["profiles"]["home"]["reconnect_delay"], "3s");
    assert_eq!(shown["profiles"]["home"]["device"], "esp32-livingroom");
}

#[test]
fn test_config_init_refuses_overwrite() {
    let (_dir, config) = temp_config();
    let init = |extra: &[&str]| {
        let mut cmd = hygrolink_cmd(&config);
        cmd.args(["config", "init", "--server", "http://10.0.0.5:8080"])
            .args(extra);
        cmd
    };

    init(&[]).assert().success();
    init(&[])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    init(&["--force"]).assert().success();
}

#[test]
fn test_config_init_rejects_bad_delay() {
    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .args([
            "config",
            "init",
            "--server",
            "http://10.0.0.5:8080",
            "--reconnect-delay",
            "soon",
        ])
        .assert()
        .failure()
        .code(2);
    assert!(!config.exists());
}

// ── Server commands ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_json_against_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "devices": [device("esp32-livingroom", 45.3, false), device("esp32-bath", 71.0, true)]
        })))
        .mount(&server)
        .await;

    let (_dir, config) = temp_config();
    let output = hygrolink_cmd(&config)
        .args(["devices", "--server", &server.uri(), "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 2);
    assert_eq!(listed[1]["device_id"], "esp32-bath");
    assert_eq!(listed[1]["alert"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_plain_lists_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "devices": [device("esp32-livingroom", 45.3, false), device("esp32-bath", 71.0, true)]
        })))
        .mount(&server)
        .await;

    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .args(["devices", "--server", &server.uri(), "--output", "plain"])
        .assert()
        .success()
        .stdout("esp32-livingroom\nesp32-bath\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_latest_table_detail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/esp32-bath/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device("esp32-bath", 71.0, true)))
        .mount(&server)
        .await;

    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .args(["latest", "esp32-bath", "--server", &server.uri()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Humidity:    71.0%")
                .and(predicate::str::contains("Alert:       humidity too high")),
        );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_latest_unknown_device_exit_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/ghost/latest"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .args(["latest", "ghost", "--server", &server.uri()])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("device 'ghost' not found"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_ends_when_stream_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "devices": [device("esp32-livingroom", 45.3, false)]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/esp32-livingroom/latest"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(device("esp32-livingroom", 45.3, false)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/esp32-livingroom/stream"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (_dir, config) = temp_config();
    hygrolink_cmd(&config)
        .args(["watch", "--server", &server.uri(), "--output", "json-compact"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .code(7)
        .stderr(predicate::str::contains("HTTP 503"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_prints_stream_updates_until_close() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "devices": [device("esp32-livingroom", 45.3, false)]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/esp32-livingroom/latest"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(device("esp32-livingroom", 45.3, false)),
        )
        .mount(&server)
        .await;

    let update = device("esp32-livingroom", 52.0, true);
    let body = format!("event: status\ndata: {update}\n\n");
    Mock::given(method("GET"))
        .and(path("/v1/devices/esp32-livingroom/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let (_dir, config) = temp_config();
    let output = hygrolink_cmd(&config)
        .args(["watch", "--server", &server.uri(), "--output", "json"])
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let last: serde_json::Value = serde_json::from_str(stdout.lines().last().unwrap()).unwrap();
    assert_eq!(last["device_id"], "esp32-livingroom");
    assert_eq!(last["humidity"], 52.0);
    assert_eq!(last["alert"], true);
}
