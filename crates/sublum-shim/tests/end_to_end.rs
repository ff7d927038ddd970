//! End-to-end scenarios driving the `sublum-shim` binary against the
//! `fake-upstream` test binary (spec.md §8).

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::{json, Value};
use sublum_events::Envelope;
use sublum_testing::{allow_all_bundle, deny_tool_bundle, hinted_reject_bundle, rate_limited_bundle};

struct Harness {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    events_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn spawn(policy: &Value) -> Self {
        Self::spawn_with_args(policy, &[])
    }

    fn spawn_with_args(policy: &Value, extra_args: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let events_path = dir.path().join("events.ndjson");
        let mut child = Command::new(env!("CARGO_BIN_EXE_sublum-shim"))
            .args(["--server-name", "fixture-server"])
            .args(["--policy-json", &policy.to_string()])
            .args(["--event-sink", events_path.to_str().unwrap()])
            .args(["--forward-timeout-ms", "2000"])
            .args(extra_args)
            .arg("--")
            .arg(env!("CARGO_BIN_EXE_fake-upstream"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sublum-shim");
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        Harness { child, stdin, stdout, events_path, _dir: dir }
    }

    fn call(&mut self, id: i64, tool_name: &str, arguments: Value) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": tool_name, "arguments": arguments},
        }));
        self.read_response()
    }

    fn send(&mut self, value: &Value) {
        let mut line = serde_json::to_vec(value).expect("request serializes");
        line.push(b'\n');
        self.stdin.write_all(&line).expect("write request");
        self.stdin.flush().expect("flush request");
    }

    fn read_response(&mut self) -> Value {
        let mut line = String::new();
        self.stdout.read_line(&mut line).expect("read response line");
        assert!(!line.is_empty(), "shim closed stdout before replying");
        serde_json::from_str(&line).expect("response line is valid JSON")
    }

    /// Close the agent side of stdin (EOF) and wait for the shim to exit.
    fn finish(mut self) -> (ExitStatus, Vec<Envelope>) {
        drop(self.stdin);
        let status = self.child.wait().expect("shim process exits");
        let contents = std::fs::read_to_string(&self.events_path).unwrap_or_default();
        let events = contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).expect("event line is a valid envelope"))
            .collect();
        (status, events)
    }
}

fn event_type(envelope: &Value) -> &str {
    envelope["type"].as_str().expect("event has a type tag")
}

fn envelopes_as_json(events: &[Envelope]) -> Vec<Value> {
    events.iter().map(|e| serde_json::to_value(e).expect("envelope serializes")).collect()
}

#[test]
fn allowed_call_is_forwarded_and_produces_a_stable_canonical_hash() {
    let mut harness = Harness::spawn(&allow_all_bundle());

    let response = harness.call(1, "read_file", json!({"path": "a.txt", "encoding": "utf8"}));
    assert_eq!(response["result"]["echoed_arguments"]["path"], json!("a.txt"));

    // Same semantic arguments, different key order: canonicalisation must
    // produce an identical args_hash both times.
    let response2 = harness.call(2, "read_file", json!({"encoding": "utf8", "path": "a.txt"}));
    assert_eq!(response2["result"]["echoed_arguments"]["path"], json!("a.txt"));

    let (status, events) = harness.finish();
    assert!(status.success());

    let raw = envelopes_as_json(&events);
    let starts: Vec<&Value> = raw.iter().filter(|e| event_type(e) == "tool_call_start").collect();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0]["call"]["args_hash"], starts[1]["call"]["args_hash"]);

    let ends: Vec<&Value> = raw.iter().filter(|e| event_type(e) == "tool_call_end").collect();
    assert_eq!(ends.len(), 2);
    assert_eq!(ends[0]["status"], json!("OK"));
    assert_eq!(ends[1]["status"], json!("OK"));

    let run_end = raw.iter().find(|e| event_type(e) == "run_end").expect("run_end present");
    assert_eq!(run_end["status"], json!("COMPLETED"));
    assert_eq!(run_end["summary"]["calls_total"], json!(2));
    assert_eq!(run_end["summary"]["calls_allowed"], json!(2));
}

#[test]
fn blocked_call_returns_block_code_and_is_never_forwarded() {
    let mut harness = Harness::spawn(&deny_tool_bundle("git_push"));

    let response = harness.call(1, "git_push", json!({"remote": "origin"}));
    assert_eq!(response["error"]["code"], json!(-32081));
    assert_eq!(response["error"]["data"]["subluminal"]["reason_code"], json!("FIXTURE_DENY_TOOL"));

    let (status, events) = harness.finish();
    assert!(status.success());

    let raw = envelopes_as_json(&events);
    let end = raw.iter().find(|e| event_type(e) == "tool_call_end").expect("tool_call_end present");
    assert_eq!(end["status"], json!("ERROR"));
    assert_eq!(end["error"]["class"], json!("policy_block"));

    let run_end = raw.iter().find(|e| event_type(e) == "run_end").unwrap();
    assert_eq!(run_end["summary"]["calls_blocked"], json!(1));
    assert_eq!(run_end["summary"]["calls_allowed"], json!(0));
}

#[test]
fn rate_limited_second_call_is_throttled() {
    let mut harness = Harness::spawn(&rate_limited_bundle("git_push"));

    let first = harness.call(1, "git_push", json!({"remote": "origin"}));
    assert!(first.get("result").is_some(), "first call should be allowed through: {first:?}");

    let second = harness.call(2, "git_push", json!({"remote": "origin"}));
    assert_eq!(second["error"]["code"], json!(-32082));
    assert_eq!(second["error"]["data"]["subluminal"]["reason_code"], json!("FIXTURE_RATE_LIMITED"));
    assert!(second["error"]["data"]["subluminal"]["backoff_ms"].is_u64());

    let (status, events) = harness.finish();
    assert!(status.success());

    let raw = envelopes_as_json(&events);
    let run_end = raw.iter().find(|e| event_type(e) == "run_end").unwrap();
    assert_eq!(run_end["summary"]["calls_allowed"], json!(1));
    assert_eq!(run_end["summary"]["calls_throttled"], json!(1));
}

#[test]
fn hinted_reject_carries_corrective_hint_in_control_mode() {
    let mut harness = Harness::spawn(&hinted_reject_bundle("big_batch_tool"));

    let response = harness.call(1, "big_batch_tool", json!({"batch": 10_000}));
    assert_eq!(response["error"]["code"], json!(-32083));
    assert_eq!(response["error"]["data"]["subluminal"]["hint"]["hint_text"], json!("retry with a smaller batch size"));
    assert_eq!(response["error"]["data"]["subluminal"]["hint"]["suggested_args"]["batch"], json!(10));

    let (status, events) = harness.finish();
    assert!(status.success());
    let raw = envelopes_as_json(&events);
    let run_end = raw.iter().find(|e| event_type(e) == "run_end").unwrap();
    assert_eq!(run_end["summary"]["calls_rejected"], json!(1));
}

#[test]
fn oversized_arguments_are_hashed_by_prefix_and_previewed_as_truncated() {
    let mut harness = Harness::spawn_with_args(&allow_all_bundle(), &["--max-inspect-bytes", "1024"]);

    let oversized = "x".repeat(1_048_577);
    let response = harness.call(1, "upload_blob", json!({"data": oversized}));
    assert!(response.get("result").is_some(), "oversized payload is still allowed through: {response:?}");

    let (status, events) = harness.finish();
    assert!(status.success());

    let raw = envelopes_as_json(&events);
    let start = raw.iter().find(|e| event_type(e) == "tool_call_start").expect("tool_call_start present");
    assert_eq!(start["call"]["preview"]["truncated"], json!(true));
    assert_eq!(start["call"]["preview"]["args_preview"], json!("[TRUNCATED]"));
}

#[test]
fn sigint_drains_the_upstream_group_and_exits_cleanly() {
    let mut harness = Harness::spawn_with_args(&allow_all_bundle(), &["--grace-ms", "2000"]);
    let response = harness.call(1, "read_file", json!({"path": "a.txt"}));
    assert!(response.get("result").is_some());

    signal::kill(Pid::from_raw(harness.child.id() as i32), Signal::SIGINT).expect("send SIGINT to shim");

    let status = harness.child.wait().expect("shim exits after SIGINT");
    assert!(status.success(), "expected a clean exit after SIGINT, got {status:?}");

    let contents = std::fs::read_to_string(&harness.events_path).unwrap_or_default();
    let events: Vec<Value> = contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("event line is valid JSON"))
        .collect();
    let run_end = events.iter().find(|e| event_type(e) == "run_end").expect("run_end present");
    assert_eq!(run_end["status"], json!("TERMINATED"));
}

#[test]
fn agent_disconnect_shuts_the_run_down_cleanly() {
    let mut harness = Harness::spawn(&allow_all_bundle());
    let response = harness.call(1, "read_file", json!({"path": "a.txt"}));
    assert!(response.get("result").is_some());

    // Closing stdin (agent hangup) must tear the upstream down and exit 0,
    // not hang waiting for a tool call that will never come.
    let (status, events) = harness.finish();
    assert!(status.success());

    let raw = envelopes_as_json(&events);
    let run_end = raw.iter().find(|e| event_type(e) == "run_end").expect("run_end present");
    assert_eq!(run_end["status"], json!("COMPLETED"));
}
