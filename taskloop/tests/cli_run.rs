//! CLI tests for `taskloop run` and `taskloop init`.
//!
//! Spawns the binary against a shell-script backend and verifies exit codes
//! and the JSON-lines transcript.
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use taskloop::exit_codes;
use taskloop::io::config::load_config;
use taskloop::test_support::temp_config;

const TRIP_BACKEND: &str = r#"
[backend]
command = ["sh", "-c", '''
cat >/dev/null
case "$TASKLOOP_OPERATION" in
  start_goal) echo '{"tasks": ["Book flight", "Book hotel"]}' ;;
  execute_task) echo '{"result": "booked"}' ;;
  create_tasks) echo '{"tasks": []}' ;;
  *) echo '{"reasoning": "r", "action": "reason", "arg": ""}' ;;
esac
''']
timeout_secs = 10
"#;

const QUOTA_BACKEND: &str = r#"
[backend]
command = ["sh", "-c", '''
cat >/dev/null
echo '{"error": {"status": 429, "message": "You exceeded your current quota"}}'
exit 1
''']
"#;

fn taskloop(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskloop"))
        .arg("--config")
        .arg(config)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("spawn taskloop")
}

#[test]
fn run_completes_and_records_transcript() {
    let (dir, config) = temp_config(TRIP_BACKEND).expect("config");
    let transcript = dir.path().join("transcript.jsonl");

    let output = taskloop(
        &config,
        &[
            "run",
            "--goal",
            "Plan a trip",
            "--transcript",
            transcript.to_str().expect("utf-8 path"),
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let contents = fs::read_to_string(&transcript).expect("read transcript");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines[0], r#"{"type":"goal","value":"Plan a trip"}"#);
    assert_eq!(lines[1], r#"{"type":"thinking"}"#);
    assert_eq!(
        lines.last().copied(),
        Some(r#"{"type":"system","text":"All tasks completed. Shutting down."}"#)
    );
    let finals = lines
        .iter()
        .filter(|line| line.contains(r#""status":"final""#))
        .count();
    assert_eq!(finals, 2);
}

#[test]
fn run_exits_with_loop_limit_code() {
    let (_dir, config) = temp_config(TRIP_BACKEND).expect("config");
    let output = taskloop(&config, &["run", "--goal", "Plan a trip", "--max-loops", "1"]);
    assert_eq!(output.status.code(), Some(exit_codes::LOOP_LIMIT));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("limit of 1 loops"));
}

#[test]
fn bootstrap_quota_failure_exits_invalid() {
    let (_dir, config) = temp_config(QUOTA_BACKEND).expect("config");
    let output = taskloop(&config, &["run", "--goal", "Plan a trip"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("quota"));
}

#[test]
fn stepwise_run_stops_when_input_closes() {
    let contents = format!("initial_control = \"pause\"\n{TRIP_BACKEND}");
    let (_dir, config) = temp_config(&contents).expect("config");
    let output = taskloop(&config, &["run", "--goal", "Plan a trip", "--stepwise"]);
    assert_eq!(output.status.code(), Some(exit_codes::STOPPED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Manually shutting down."));
    assert!(!stdout.contains("[executing]"));
}

#[test]
fn empty_goal_is_rejected() {
    let (_dir, config) = temp_config(TRIP_BACKEND).expect("config");
    let output = taskloop(&config, &["run", "--goal", "  "]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("taskloop.toml");

    let output = taskloop(&config, &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let cfg = load_config(&config).expect("load");
    assert_eq!(cfg.backend.command, vec!["taskloop-backend".to_string()]);

    fs::write(&config, "max_loops = 3\n").expect("edit");
    let output = taskloop(&config, &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&config).expect("load").max_loops, Some(3));
}
