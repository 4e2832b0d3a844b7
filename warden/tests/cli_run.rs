//! CLI tests for the `warden` binary.
//!
//! Spawns the binary and checks exit codes and the single status line. The
//! model is a shell command, so these tests only run on unix.

#![cfg(unix)]

use std::path::Path;
use std::process::{Command, Output};

use warden::exit_codes;
use warden::io::config::{WardenConfig, load_config, write_config};
use warden::io::init::config_path;
use warden::test_support::patch_response;

fn warden(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_warden"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn warden")
}

fn set_model_command(root: &Path, script: &str) {
    let path = config_path(root);
    let mut config = if path.exists() {
        load_config(&path).expect("load config")
    } else {
        WardenConfig::default()
    };
    let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    config.model.fast_command = command.clone();
    config.model.strong_command = command;
    config.model.retry_backoff_ms = 0;
    write_config(&path, &config).expect("write config");
}

#[test]
fn init_enqueue_run_status_round_trip() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();

    let init = warden(root, &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK));

    let response = patch_response("say hello", &[("hello.txt", Some("hello"))]);
    set_model_command(root, &format!("cat >/dev/null; printf '%s' '{response}'"));

    let enqueue = warden(root, &["enqueue", "write a hello file"]);
    assert_eq!(enqueue.status.code(), Some(exit_codes::OK));

    let run = warden(root, &[]);
    assert_eq!(run.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&run.stdout), "committed iteration 1\n");
    let hello = std::fs::read_to_string(root.join("workspace/hello.txt")).expect("hello.txt");
    assert_eq!(hello, "hello");

    let status = warden(root, &["status"]);
    assert_eq!(status.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("tasks: 0 pending, 0 in progress, 1 done, 0 stuck"), "{stdout}");
    assert!(stdout.contains("last: committed iteration 1"), "{stdout}");
}

#[test]
fn failing_model_is_a_handled_outcome() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    assert_eq!(warden(root, &["init"]).status.code(), Some(exit_codes::OK));
    set_model_command(root, "cat >/dev/null; echo unavailable >&2; exit 3");
    assert_eq!(
        warden(root, &["enqueue", "write notes"]).status.code(),
        Some(exit_codes::OK)
    );

    let first = warden(root, &[]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&first.stdout), "rolled_back iteration 1\n");

    let second = warden(root, &[]);
    assert_eq!(second.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&second.stdout), "rolled_back iteration 2\n");
}

#[test]
fn run_on_fresh_root_scaffolds_first() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    // Config without the rest of `.warden/`: the run scaffolds around it.
    // Planning fails and the fallback path still records the iteration.
    set_model_command(root, "cat >/dev/null; exit 1");
    let run = warden(root, &[]);
    assert_eq!(run.status.code(), Some(exit_codes::OK));
    assert_eq!(
        String::from_utf8_lossy(&run.stdout),
        "fallback_recovered iteration 1\n"
    );
    assert!(root.join(".warden/state/iterations.jsonl").is_file());
}

#[test]
fn second_init_without_force_is_refused() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    assert_eq!(warden(root, &["init"]).status.code(), Some(exit_codes::OK));
    assert_eq!(warden(root, &["init"]).status.code(), Some(exit_codes::INVALID));
    assert_eq!(
        warden(root, &["init", "--force"]).status.code(),
        Some(exit_codes::OK)
    );
}
