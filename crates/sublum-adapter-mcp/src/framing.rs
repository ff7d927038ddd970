//! Newline-delimited JSON-RPC framing over an `AsyncRead`/`AsyncWrite` pair
//! (spec.md §4.6 "Framing": one reader task per direction, one message per
//! line, no embedded newlines). Grounded in the line-oriented read/write
//! helpers `abp-sidecar-proto` builds over `tokio::io::{AsyncBufReadExt,
//! AsyncWriteExt}`.

use std::sync::OnceLock;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Reads one newline-delimited frame at a time from an async byte stream.
pub struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap `inner` in a buffered line reader.
    pub fn new(inner: R) -> Self {
        Self { inner: BufReader::new(inner) }
    }

    /// Read the next frame, stripped of its trailing `\n` (and `\r\n` if
    /// present). Returns `Ok(None)` at clean EOF.
    pub async fn read_frame(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let n = self.inner.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(Some(buf))
    }
}

/// Write one frame, appending `\n` and flushing so the peer sees it
/// immediately (MCP-stdio has no application-level framing beyond the
/// newline; a buffered-but-unflushed write would stall the other side).
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Serialise `value` and write it as one frame.
pub async fn write_json_frame<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(value).map_err(std::io::Error::other)?;
    write_frame(writer, &bytes).await
}

fn empty_args() -> &'static Value {
    static EMPTY: OnceLock<Value> = OnceLock::new();
    EMPTY.get_or_init(|| serde_json::json!({}))
}

/// `true` if `msg` is a `tools/call` request (spec.md §4.6 "Request
/// handling": every other method/notification passes through verbatim).
#[must_use]
pub fn is_tools_call(msg: &Value) -> bool {
    msg.get("method").and_then(Value::as_str) == Some("tools/call")
}

/// A `tools/call` request, borrowed from the parsed message it was
/// extracted from.
#[derive(Debug, Clone, Copy)]
pub struct ToolCallRequest<'a> {
    /// The JSON-RPC request id, echoed back on any synthesized response.
    pub id: &'a Value,
    /// `params.name` — the tool being invoked.
    pub tool_name: &'a str,
    /// `params.arguments`, or an empty object if the field was omitted.
    pub arguments: &'a Value,
}

/// Extract the tool name and arguments from a `tools/call` request.
/// Returns `None` for any other method, or for a `tools/call` missing the
/// required `params.name` field (treated as a passthrough message — the
/// adapter only intercepts well-formed tool calls).
#[must_use]
pub fn extract_tool_call(msg: &Value) -> Option<ToolCallRequest<'_>> {
    if !is_tools_call(msg) {
        return None;
    }
    let id = msg.get("id")?;
    let params = msg.get("params")?;
    let tool_name = params.get("name")?.as_str()?;
    let arguments = params.get("arguments").unwrap_or_else(empty_args);
    Some(ToolCallRequest { id, tool_name, arguments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn line_reader_strips_newline_and_reports_eof() {
        let data = b"{\"a\":1}\n{\"b\":2}".to_vec();
        let mut reader = LineReader::new(std::io::Cursor::new(data));
        let first = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(first, b"{\"a\":1}");
        let second = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(second, b"{\"b\":2}");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn line_reader_strips_carriage_return() {
        let data = b"{\"a\":1}\r\n".to_vec();
        let mut reader = LineReader::new(std::io::Cursor::new(data));
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn write_frame_appends_single_newline() {
        let mut out = Vec::new();
        write_frame(&mut out, b"{\"a\":1}").await.unwrap();
        assert_eq!(out, b"{\"a\":1}\n");
    }

    #[test]
    fn extracts_tool_name_and_arguments() {
        let msg = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "git_push", "arguments": {"branch": "main"}}});
        let call = extract_tool_call(&msg).expect("tool call extracted");
        assert_eq!(call.tool_name, "git_push");
        assert_eq!(call.arguments, &json!({"branch": "main"}));
    }

    #[test]
    fn missing_arguments_defaults_to_empty_object() {
        let msg = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "noop"}});
        let call = extract_tool_call(&msg).unwrap();
        assert_eq!(call.arguments, &json!({}));
    }

    #[test]
    fn non_tools_call_is_not_extracted() {
        let msg = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        assert!(!is_tools_call(&msg));
        assert!(extract_tool_call(&msg).is_none());
    }

    #[test]
    fn tools_call_without_name_is_not_extracted() {
        let msg = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {}});
        assert!(extract_tool_call(&msg).is_none());
    }
}
