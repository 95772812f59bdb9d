use std::path::Path;
use std::process::Command;

use serde_json::Value;

fn run_ctl(args: &[&str], home: &Path) -> std::process::Output {
    let exe = env!("CARGO_BIN_EXE_hubsyncctl");
    Command::new(exe)
        .args(args)
        .env("HOME", home)
        .env("HUBSYNC_CONFIG", home.join("settings.json"))
        .env_remove("HUBSYNC_TOKEN")
        .env_remove("HF_TOKEN")
        .output()
        .expect("hubsyncctl should execute")
}

#[test]
fn help_lists_primary_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = run_ctl(&["--help"], home.path());
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--start"));
    assert!(stdout.contains("--reload-config"));
    assert!(stdout.contains("--show-settings"));
}

#[test]
fn show_settings_masks_the_token() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(
        home.path().join("settings.json"),
        r#"{ "hf_token": "hf_secret", "repo_id": "alice/nas-backup", "max_retries": "7" }"#,
    )
    .unwrap();

    let output = run_ctl(&["--show-settings"], home.path());
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(json["hf_token"], "***");
    assert_eq!(json["repo_id"], "alice/nas-backup");
    assert_eq!(json["max_retries"], 7);
    assert!(!String::from_utf8_lossy(&output.stdout).contains("hf_secret"));
}

#[test]
fn unknown_argument_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = run_ctl(&["--bogus"], home.path());
    assert!(!output.status.success());
}
