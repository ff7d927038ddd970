//! A scriptable MCP-stdio stand-in for a real tool server, spawned by
//! integration tests via `env!("CARGO_BIN_EXE_fake-upstream")` in place of
//! `sublum-supervisor::ProcessSpec`'s real command.
//!
//! Reads line-delimited JSON-RPC 2.0 requests from stdin and replies on
//! stdout. For any `tools/call` request it echoes the call's arguments back
//! as the result, unless the arguments carry one of two test hooks:
//! `_delay_ms` (sleep before replying, to exercise timeout paths) or
//! `_crash` (exit immediately with no reply, to exercise the supervisor's
//! unprompted-exit detection). Any other method gets a generic empty-object
//! result.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let Some(response) = handle(&request).await else {
            std::process::exit(1);
        };

        let mut rendered = serde_json::to_vec(&response).expect("response serializes");
        rendered.push(b'\n');
        if stdout.write_all(&rendered).await.is_err() || stdout.flush().await.is_err() {
            break;
        }
    }
}

async fn handle(request: &Value) -> Option<Value> {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();

    if method != "tools/call" {
        return Some(json!({"jsonrpc": "2.0", "id": id, "result": {}}));
    }

    let arguments = request
        .get("params")
        .and_then(|p| p.get("arguments"))
        .cloned()
        .unwrap_or_else(|| json!({}));

    if arguments.get("_crash").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    if let Some(delay_ms) = arguments.get("_delay_ms").and_then(Value::as_u64) {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Some(json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"content": [{"type": "text", "text": "ok"}], "echoed_arguments": arguments},
    }))
}
