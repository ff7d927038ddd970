//! The six-task run loop (spec.md §5): agent-reader, agent-writer,
//! upstream-reader, upstream-writer, and a supervisor task, all spawned onto
//! one `tokio::task::JoinSet` and coordinated by a hand-rolled
//! `tokio::sync::watch<bool>` shutdown signal — the teacher's own daemon
//! composes its worker tasks the same way, without reaching for
//! `tokio-util`. The sixth task, the emitter consumer, is already running
//! inside `sublum_emitter::spawn`.
//!
//! Per-call forward-timeout watchers are additional short-lived tasks
//! spawned ad hoc for every allowed call; they are not tracked in the main
//! `JoinSet` because draining the correlation table at shutdown resolves
//! them almost immediately (their `oneshot::Receiver` sees its `Sender`
//! dropped and returns right away, rather than waiting out the timeout).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sublum_adapter_mcp::correlation::PendingCall;
use sublum_adapter_mcp::{framing, rpcerror, CorrelationTable};
use sublum_core::config::{ConfigValidator, StartupConfig};
use sublum_core::error::ErrorClass;
use sublum_core::time::{MonotonicClock, SeqCounter};
use sublum_core::{Identity, Transport};
use sublum_events::{CallError, CallInfo, CallStatus, DecisionAction, Envelope, EventBody, Preview, RunStatus};
use sublum_policy::{DecisionContext, PolicyEngine};
use sublum_supervisor::{ProcessSpec, ProcessStatus, Supervisor, SupervisorError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cli::Args;
use crate::counters::RunCounters;
use crate::error::ShimError;
use crate::{event_sink, policy_load};

/// A JSON-RPC error code for a forward timeout. Not one of the policy codes
/// in `sublum_adapter_mcp::rpcerror` (those cover non-ALLOW decisions only);
/// this one covers a call that *was* allowed but never got a reply.
const TIMEOUT_JSONRPC_CODE: i64 = -32000;
/// A JSON-RPC error code for a forwarded call whose upstream connection
/// went away before a reply arrived (shutdown draining the correlation
/// table, or a bug).
const TRANSPORT_JSONRPC_CODE: i64 = -32001;

/// Result of a completed shim run.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    /// How the run ended.
    pub status: RunStatus,
    /// The process exit code this run should produce (spec.md §6).
    pub exit_code: i32,
}

struct Shared {
    identity: Identity,
    clock: Arc<MonotonicClock>,
    seq: SeqCounter,
    correlation: Arc<CorrelationTable>,
    engine: Arc<PolicyEngine>,
    emitter: sublum_emitter::Emitter,
    counters: Arc<RunCounters>,
    server_name: String,
    max_inspect_bytes: u64,
    max_preview_bytes: usize,
    forward_timeout: Duration,
}

/// Run the shim to completion: validate configuration, compile policy,
/// resolve secrets, spawn the upstream process, and drive the six-task
/// proxy loop until shutdown.
pub async fn run(args: Args) -> Result<RunOutcome, ShimError> {
    let start = Instant::now();

    let config = StartupConfig {
        server_name: args.server_name.clone(),
        policy_path: args.policy.clone(),
        policy_json_flag: args.policy_json.clone(),
        policy_json_env: std::env::var("SUB_POLICY_JSON").ok(),
        max_inspect_bytes: args.max_inspect_bytes as usize,
        max_preview_bytes: args.max_preview_bytes,
        grace_ms: args.grace_ms,
        event_sink: args.event_sink.clone(),
    };
    let validator = ConfigValidator::new();
    let source = validator.validate(&config)?;
    for warning in validator.warnings(&config) {
        warn!(field = %warning.field, "{}", warning.message);
    }

    let identity = Identity::from_env(args.host_id.clone(), uuid::Uuid::new_v4().to_string());
    let raw_policy = policy_load::read_raw(&source)?;
    let engine = Arc::new(PolicyEngine::compile(&raw_policy)?);
    let secret_bindings = policy_load::extract_secret_bindings(&raw_policy);
    let resolved = sublum_secrets::resolve(&secret_bindings);

    let sink = event_sink::open(args.event_sink.as_deref()).await?;
    let (emitter, emitter_handle) = sublum_emitter::spawn(sink, sublum_emitter::EmitterConfig::default())?;
    let clock = Arc::new(MonotonicClock::new());

    let _ = emitter.emit_sync(Envelope::new(&identity, clock.now(), EventBody::RunStart)).await;
    for record in &resolved.records {
        let _ = emitter
            .emit_sync(Envelope::new(
                &identity,
                clock.now(),
                EventBody::SecretInjection {
                    inject_as: record.inject_as.clone(),
                    secret_ref: record.secret_ref.clone(),
                    source: record.source.clone(),
                    success: record.success,
                },
            ))
            .await;
    }

    let mut spec = ProcessSpec::new(args.upstream[0].clone());
    spec.args = args.upstream[1..].to_vec();
    spec.env = merge_child_env(resolved.child_env);
    sublum_secrets::scrub_from_own_environment(spec.env.keys());

    let counters = Arc::new(RunCounters::default());

    let supervisor = match Supervisor::spawn(&spec).await {
        Ok(s) => s,
        Err(e) => {
            let summary = counters.snapshot(start.elapsed().as_millis() as u64);
            let _ = emitter
                .emit_sync(Envelope::new(&identity, clock.now(), EventBody::RunEnd { summary, status: RunStatus::Failed }))
                .await;
            let _ = emitter_handle.close(emitter, Duration::from_millis(200)).await;
            return Err(ShimError::from(e));
        }
    };

    let shared = Arc::new(Shared {
        identity: identity.clone(),
        clock: Arc::clone(&clock),
        seq: SeqCounter::new(),
        correlation: Arc::new(CorrelationTable::default()),
        engine,
        emitter: emitter.clone(),
        counters: Arc::clone(&counters),
        server_name: args.server_name.clone(),
        max_inspect_bytes: args.max_inspect_bytes,
        max_preview_bytes: args.max_preview_bytes,
        forward_timeout: Duration::from_millis(args.forward_timeout_ms),
    });

    let (forward_tx, forward_rx) = mpsc::channel::<Vec<u8>>(256);
    let (responses_tx, responses_rx) = mpsc::channel::<Vec<u8>>(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let outcome = run_tasks(
        Arc::clone(&shared),
        supervisor,
        Duration::from_millis(args.grace_ms),
        forward_tx,
        forward_rx,
        responses_tx,
        responses_rx,
        shutdown_tx,
        shutdown_rx,
    )
    .await;
    drop(shared);

    let summary = counters.snapshot(start.elapsed().as_millis() as u64);
    let _ = emitter.emit_sync(Envelope::new(&identity, clock.now(), EventBody::RunEnd { summary, status: outcome.status })).await;
    let _ = emitter_handle.close(emitter, Duration::from_millis(500)).await;

    Ok(outcome)
}

/// `ProcessSpec.env` is the child-only environment (spec.md §4.5); nothing
/// from the shim's own environment is inherited implicitly beyond what
/// `tokio::process::Command` always passes through, so this just renames
/// the resolved-secrets map into the shape `ProcessSpec` expects.
fn merge_child_env(child_env: BTreeMap<String, String>) -> BTreeMap<String, String> {
    child_env
}

#[allow(clippy::too_many_arguments)]
async fn run_tasks(
    shared: Arc<Shared>,
    mut supervisor: Supervisor,
    grace: Duration,
    forward_tx: mpsc::Sender<Vec<u8>>,
    forward_rx: mpsc::Receiver<Vec<u8>>,
    responses_tx: mpsc::Sender<Vec<u8>>,
    responses_rx: mpsc::Receiver<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
) -> RunOutcome {
    let upstream_stdin = supervisor.stdin;
    let upstream_stdout = supervisor.stdout;

    let mut tasks = JoinSet::new();
    tasks.spawn(agent_reader(Arc::clone(&shared), forward_tx.clone(), responses_tx.clone(), shutdown_tx.clone(), shutdown_rx.clone()));
    tasks.spawn(upstream_reader(Arc::clone(&shared), upstream_stdout, responses_tx.clone(), shutdown_rx.clone()));
    tasks.spawn(upstream_writer(upstream_stdin, forward_rx));
    tasks.spawn(agent_writer(responses_rx));

    drop(forward_tx);
    drop(responses_tx);

    let (status, supervisor_exit) = tokio::select! {
        reason = sublum_supervisor::wait_for_shutdown_signal() => {
            info!(?reason, "shutdown signal received");
            let _ = shutdown_tx.send(true);
            (RunStatus::Terminated, supervisor.shutdown(grace).await)
        }
        outcome = supervisor.wait() => {
            info!("upstream process exited on its own");
            let _ = shutdown_tx.send(true);
            (status_for_self_exit(&outcome), outcome)
        }
    };

    for pending in shared.correlation.drain() {
        drop(pending);
    }

    while tasks.join_next().await.is_some() {}

    RunOutcome { status, exit_code: exit_code_for(status, &supervisor_exit) }
}

fn status_for_self_exit(outcome: &Result<ProcessStatus, SupervisorError>) -> RunStatus {
    match outcome {
        Ok(ProcessStatus::Exited { code: Some(0) }) => RunStatus::Completed,
        _ => RunStatus::Failed,
    }
}

fn exit_code_for(status: RunStatus, outcome: &Result<ProcessStatus, SupervisorError>) -> i32 {
    match (status, outcome) {
        (RunStatus::Completed, _) => 0,
        (RunStatus::Terminated, Ok(ProcessStatus::Killed)) => 128 + 9,
        (RunStatus::Terminated, _) => 0,
        (RunStatus::Failed, Ok(ProcessStatus::Exited { code: Some(c) })) => *c,
        (RunStatus::Failed, _) => 1,
    }
}

async fn agent_reader(
    shared: Arc<Shared>,
    forward_tx: mpsc::Sender<Vec<u8>>,
    responses_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let stdin = tokio::io::stdin();
    let mut reader = framing::LineReader::new(stdin);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = reader.read_frame() => {
                match frame {
                    Ok(Some(line)) => {
                        if handle_agent_line(&shared, &line, &forward_tx, &responses_tx, &shutdown_tx).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "agent stdin read error");
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                }
            }
        }
    }
}

/// Handle one line from the agent. Returns `true` if the run must stop
/// (a `TERMINATE_RUN` decision fired).
async fn handle_agent_line(
    shared: &Arc<Shared>,
    raw_line: &[u8],
    forward_tx: &mpsc::Sender<Vec<u8>>,
    responses_tx: &mpsc::Sender<Vec<u8>>,
    shutdown_tx: &watch::Sender<bool>,
) -> bool {
    let msg: serde_json::Value = match serde_json::from_slice(raw_line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "malformed JSON-RPC line from agent; forwarding verbatim");
            let _ = forward_tx.send(raw_line.to_vec()).await;
            return false;
        }
    };

    let Some(call) = framing::extract_tool_call(&msg) else {
        let _ = forward_tx.send(raw_line.to_vec()).await;
        return false;
    };

    let inspected = sublum_adapter_mcp::inspect::inspect(raw_line, call.arguments, shared.max_inspect_bytes, shared.max_preview_bytes);
    let seq = shared.seq.next();
    let call_id = uuid::Uuid::new_v4().to_string();

    shared.emitter.emit(Envelope::new(
        &shared.identity,
        shared.clock.now(),
        EventBody::ToolCallStart {
            call: CallInfo {
                call_id: call_id.clone(),
                server_name: shared.server_name.clone(),
                tool_name: call.tool_name.to_string(),
                transport: Transport::McpStdio,
                args_hash: inspected.args_hash.clone(),
                bytes_in: raw_line.len() as u64,
                seq,
                preview: inspected.preview.clone(),
            },
        },
    ));

    let ctx = DecisionContext {
        identity: &shared.identity,
        server_name: &shared.server_name,
        tool_name: call.tool_name,
        args_hash: &inspected.args_hash,
        args: call.arguments,
        now: chrono::Utc::now(),
    };
    let decision = shared.engine.evaluate(&ctx);
    shared.counters.record(decision.action);

    let _ = shared
        .emitter
        .emit_sync(Envelope::new(
            &shared.identity,
            shared.clock.now(),
            EventBody::ToolCallDecision { call_id: call_id.clone(), decision: decision.clone() },
        ))
        .await;

    if decision.action.is_allow() {
        let (reply_tx, reply_rx) = oneshot::channel();
        shared.correlation.insert(
            call.id,
            PendingCall {
                call_id: call_id.clone(),
                server_name: shared.server_name.clone(),
                tool_name: call.tool_name.to_string(),
                started_at: Instant::now(),
                reply: reply_tx,
            },
        );
        if forward_tx.send(raw_line.to_vec()).await.is_err() {
            warn!("upstream-writer channel closed; call will time out");
        }
        spawn_call_watcher(Arc::clone(shared), call_id, call.tool_name.to_string(), call.id.clone(), responses_tx.clone(), reply_rx);
        false
    } else {
        let identity_for_error = rpcerror::CallIdentity {
            run_id: &shared.identity.run_id,
            call_id: &call_id,
            server_name: &shared.server_name,
            tool_name: call.tool_name,
            args_hash: &inspected.args_hash,
        };
        let response = rpcerror::synthesize_error_response(call.id, &decision, identity_for_error);
        let bytes = serde_json::to_vec(&response).unwrap_or_default();
        let bytes_out = bytes.len() as u64;
        let _ = responses_tx.send(bytes).await;

        shared.emitter.emit(Envelope::new(
            &shared.identity,
            shared.clock.now(),
            EventBody::ToolCallEnd {
                call_id: call_id.clone(),
                status: CallStatus::Error,
                latency_ms: 0,
                bytes_out,
                result_preview: None,
                error: Some(CallError { class: ErrorClass::PolicyBlock, message: decision.explain.summary.clone() }),
            },
        ));

        decision.action == DecisionAction::TerminateRun && shutdown_tx.send(true).is_ok()
    }
}

fn spawn_call_watcher(
    shared: Arc<Shared>,
    call_id: String,
    tool_name: String,
    request_id: serde_json::Value,
    responses_tx: mpsc::Sender<Vec<u8>>,
    reply_rx: oneshot::Receiver<Vec<u8>>,
) {
    tokio::spawn(async move {
        match tokio::time::timeout(shared.forward_timeout, reply_rx).await {
            Ok(Ok(raw_line)) => {
                let _ = responses_tx.send(raw_line).await;
            }
            Ok(Err(_)) => {
                finish_with_synthetic_error(
                    &shared,
                    &call_id,
                    &tool_name,
                    &request_id,
                    &responses_tx,
                    ErrorClass::UpstreamError,
                    TRANSPORT_JSONRPC_CODE,
                    "REASON_UPSTREAM_CONNECTION_CLOSED",
                    "upstream connection closed before replying",
                    0,
                )
                .await;
            }
            Err(_elapsed) => {
                shared.correlation.take(&request_id);
                let latency_ms = shared.forward_timeout.as_millis() as u64;
                finish_with_synthetic_error(
                    &shared,
                    &call_id,
                    &tool_name,
                    &request_id,
                    &responses_tx,
                    ErrorClass::Timeout,
                    TIMEOUT_JSONRPC_CODE,
                    "REASON_FORWARD_TIMEOUT",
                    "forward timeout exceeded",
                    latency_ms,
                )
                .await;
            }
        }
    });
}

#[allow(clippy::too_many_arguments)]
async fn finish_with_synthetic_error(
    shared: &Arc<Shared>,
    call_id: &str,
    tool_name: &str,
    request_id: &serde_json::Value,
    responses_tx: &mpsc::Sender<Vec<u8>>,
    class: ErrorClass,
    code: i64,
    reason_code: &str,
    message: &str,
    latency_ms: u64,
) {
    let response = serde_json::json!({
        "jsonrpc": "2.0",
        "id": request_id,
        "error": {
            "code": code,
            "message": message,
            "data": {"subluminal": {"v": sublum_core::INTERFACE_VERSION, "reason_code": reason_code}},
        },
    });
    let bytes = serde_json::to_vec(&response).unwrap_or_default();
    let bytes_out = bytes.len() as u64;
    let _ = responses_tx.send(bytes).await;

    shared.engine.observe_call_error(&shared.server_name, tool_name, &shared.identity);
    shared.emitter.emit(Envelope::new(
        &shared.identity,
        shared.clock.now(),
        EventBody::ToolCallEnd {
            call_id: call_id.to_string(),
            status: CallStatus::Error,
            latency_ms,
            bytes_out,
            result_preview: None,
            error: Some(CallError { class, message: message.to_string() }),
        },
    ));
}

async fn upstream_reader(
    shared: Arc<Shared>,
    mut stdout: tokio::process::ChildStdout,
    responses_tx: mpsc::Sender<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut reader = framing::LineReader::new(&mut stdout);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = reader.read_frame() => {
                match frame {
                    Ok(Some(line)) => handle_upstream_line(&shared, line, &responses_tx).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "upstream stdout read error");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_upstream_line(shared: &Arc<Shared>, raw_line: Vec<u8>, responses_tx: &mpsc::Sender<Vec<u8>>) {
    let value: serde_json::Value = match serde_json::from_slice(&raw_line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "malformed JSON-RPC line from upstream; forwarding verbatim");
            let _ = responses_tx.send(raw_line).await;
            return;
        }
    };

    let Some(id) = value.get("id").cloned() else {
        let _ = responses_tx.send(raw_line).await;
        return;
    };

    let Some(pending) = shared.correlation.take(&id) else {
        let _ = responses_tx.send(raw_line).await;
        return;
    };

    let latency_ms = pending.started_at.elapsed().as_millis() as u64;
    let bytes_out = raw_line.len() as u64;
    let is_error = value.get("error").is_some();

    let (preview_source, status, error) = if is_error {
        let message = value["error"].get("message").and_then(serde_json::Value::as_str).unwrap_or("upstream error").to_string();
        shared.engine.observe_call_error(&pending.server_name, &pending.tool_name, &shared.identity);
        (value["error"].clone(), CallStatus::Error, Some(CallError { class: ErrorClass::UpstreamError, message }))
    } else {
        (value.get("result").cloned().unwrap_or(serde_json::Value::Null), CallStatus::Ok, None)
    };
    let (preview_text, truncated) = sublum_codec::bounded_preview(&preview_source, shared.max_preview_bytes);

    shared.emitter.emit(Envelope::new(
        &shared.identity,
        shared.clock.now(),
        EventBody::ToolCallEnd {
            call_id: pending.call_id.clone(),
            status,
            latency_ms,
            bytes_out,
            result_preview: Some(Preview { truncated, args_preview: preview_text }),
            error,
        },
    ));

    let _ = pending.reply.send(raw_line);
}

async fn upstream_writer(mut stdin: tokio::process::ChildStdin, mut forward_rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(bytes) = forward_rx.recv().await {
        if let Err(e) = framing::write_frame(&mut stdin, &bytes).await {
            warn!(error = %e, "failed writing to upstream stdin");
            break;
        }
    }
}

async fn agent_writer(mut responses_rx: mpsc::Receiver<Vec<u8>>) {
    let mut stdout = tokio::io::stdout();
    while let Some(bytes) = responses_rx.recv().await {
        if let Err(e) = framing::write_frame(&mut stdout, &bytes).await {
            warn!(error = %e, "failed writing to agent stdout");
            break;
        }
    }
}
