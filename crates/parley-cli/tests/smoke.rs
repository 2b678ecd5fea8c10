use serde_json::{Value, json};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn write_script(path: &Path, scripts: Value) {
    std::fs::write(path, scripts.to_string()).expect("script write should succeed");
}

fn run_cli(args: &[&str], cwd: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_parley"))
        .args(args)
        .current_dir(cwd)
        .env_remove("PARLEY_MODEL")
        .output()
        .expect("cli process should start")
}

fn reply_exchange(session_id: &str, text: &str) -> Value {
    json!([
        {"step": "emit", "event": {"type": "system", "subtype": "init", "session_id": session_id}},
        {"step": "emit", "event": {"type": "stream_event", "event": {
            "type": "content_block_delta", "index": 0,
            "delta": {"type": "text_delta", "text": "Hi"}
        }}},
        {"step": "emit", "event": {"type": "assistant", "content": [{"type": "text", "text": text}]}},
        {"step": "emit", "event": {"type": "result", "subtype": "success"}}
    ])
}

#[test]
fn run_command_prints_replies_and_json_events() {
    let temp = TempDir::new().expect("tempdir should create");
    let script = temp.path().join("script.json");
    write_script(&script, json!([reply_exchange("sess-42", "Hi there")]));

    let output = run_cli(
        &[
            "run",
            "--script",
            script.to_str().expect("script path should be utf8"),
            "--message",
            "hello",
            "--json-events",
        ],
        temp.path(),
    );

    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert!(stdout.contains("[0] Hi there"));
    assert!(stdout.contains("\"kind\":\"processing-started\""));
    assert!(stdout.contains("\"kind\":\"session-id-changed\""));
    assert!(stdout.contains("session_id: sess-42"));
}

#[test]
fn denied_tool_call_still_completes_message() {
    let temp = TempDir::new().expect("tempdir should create");
    let script = temp.path().join("script.json");
    write_script(
        &script,
        json!([[
            {"step": "tool_use", "request": {
                "tool_name": "Bash",
                "tool_input": {"command": "rm -rf build"},
                "tool_use_id": "toolu_1"
            }},
            {"step": "emit", "event": {"type": "assistant", "content": [{"type": "text", "text": "Skipped it"}]}},
            {"step": "emit", "event": {"type": "result"}}
        ]]),
    );

    let output = run_cli(
        &[
            "run",
            "--script",
            script.to_str().expect("script path should be utf8"),
            "--message",
            "clean",
            "--approvals",
            "deny",
            "--no-stream-events",
        ],
        temp.path(),
    );

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert_eq!(stdout.trim(), "[0] Skipped it");
}

#[test]
fn service_failure_exits_with_error() {
    let temp = TempDir::new().expect("tempdir should create");
    let script = temp.path().join("script.json");
    write_script(
        &script,
        json!([[{"step": "fail", "message": "upstream closed"}]]),
    );

    let output = run_cli(
        &[
            "run",
            "--script",
            script.to_str().expect("script path should be utf8"),
            "--message",
            "hello",
            "--no-stream-events",
        ],
        temp.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf8");
    assert!(stderr.contains("upstream closed"));
}

#[test]
fn invalid_mode_is_rejected_by_argument_parsing() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(
        &[
            "run",
            "--script",
            "missing.json",
            "--message",
            "hi",
            "--mode",
            "yolo",
        ],
        temp.path(),
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf8");
    assert!(stderr.contains("unknown permission mode"));
}
