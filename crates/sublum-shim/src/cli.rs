//! Command-line surface (spec.md §6 "CLI flags").

use std::path::PathBuf;

use clap::Parser;

/// `sublum-shim [flags] -- <upstream-binary> [upstream-args...]`
#[derive(Parser, Debug)]
#[command(name = "sublum-shim", version, about = "Local MCP-stdio data plane: policy, audit, and secret injection for agent tool calls")]
pub struct Args {
    /// Upstream server name, stamped into every event (required).
    #[arg(long)]
    pub server_name: String,

    /// Path to a policy bundle JSON file, or `-` to read it from stdin.
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Inline policy bundle JSON. Mutually exclusive with `--policy`.
    #[arg(long)]
    pub policy_json: Option<String>,

    /// Resource ceiling on canonicalised/hashed argument bytes per call.
    #[arg(long, default_value_t = sublum_adapter_mcp::DEFAULT_MAX_INSPECT_BYTES)]
    pub max_inspect_bytes: u64,

    /// Ceiling on preview text length.
    #[arg(long, default_value_t = sublum_adapter_mcp::DEFAULT_MAX_PREVIEW_BYTES)]
    pub max_preview_bytes: usize,

    /// Grace period after SIGTERM before the upstream group is SIGKILLed.
    #[arg(long, default_value_t = 5000)]
    pub grace_ms: u64,

    /// Per-call forward timeout before a `tools/call` fails with
    /// `error.class = timeout` (spec.md §5).
    #[arg(long, default_value_t = 120_000)]
    pub forward_timeout_ms: u64,

    /// Where audit events are written: a file path, `fd:<n>` for an
    /// already-open file descriptor, or omitted to discard events.
    #[arg(long)]
    pub event_sink: Option<String>,

    /// Stable identifier for this host, used only in `Source.host_id`.
    #[arg(long, default_value = "unknown")]
    pub host_id: String,

    /// The upstream command and its arguments, everything after `--`.
    #[arg(last = true, required = true)]
    pub upstream: Vec<String>,
}
