//! RPC Bridge (spec §4.8): sits in the host process, on top of the sandbox
//! subprocess's NDJSON message port (`pml_sandbox::frame::SandboxFrame`).
//!
//! Spawns a dedicated `pml-sandbox-runner` subprocess per execution (spec
//! §4.7: "a terminated sandbox must be discarded" — there is no pooling),
//! writes the `Execute` frame, and dispatches every inbound frame: `result`/
//! `error` resolve the pending execute; `rpc` is handed to a host-supplied
//! async handler, whose reply is written back as `rpc_response`/`rpc_error`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pml_sandbox::frame::SandboxFrame;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};

/// Host-side handler for one `mcp.<namespace>.<action>(args)` call
/// intercepted from the sandbox. `method` is `namespace:action`.
#[async_trait::async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value, String>;
}

/// Bridge-level failure (spec §4.8/§7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    #[error("sandbox execution timed out")]
    ExecutionTimeout,
    #[error("bridge closed")]
    BridgeClosed,
    #[error("sandbox terminated: {0}")]
    WorkerTerminated(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    CodeError(String),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExecutionTimeout => "EXECUTION_TIMEOUT",
            Self::BridgeClosed => "BRIDGE_CLOSED",
            Self::WorkerTerminated(_) => "WORKER_TERMINATED",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::CodeError(_) => "CODE_ERROR",
        }
    }
}

/// One sandbox subprocess plus its NDJSON dispatcher loop.
pub struct SandboxBridge {
    child: Child,
    result_rx: Option<oneshot::Receiver<Result<serde_json::Value, BridgeError>>>,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl SandboxBridge {
    /// Spawn a fresh runner subprocess and send its `Execute` frame.
    /// `runner_path` is the `pml-sandbox-runner` binary, conventionally
    /// resolved as a sibling of the host's own executable.
    pub async fn spawn(
        runner_path: &PathBuf,
        execution_id: String,
        code: String,
        args: serde_json::Value,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<Self> {
        let mut cmd = Command::new(runner_path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().context("failed to spawn sandbox runner")?;
        let mut stdin = child.stdin.take().context("sandbox runner stdin not piped")?;
        let stdout = child.stdout.take().context("sandbox runner stdout not piped")?;
        let stderr = child.stderr.take();

        let execute_frame = SandboxFrame::Execute {
            id: execution_id.clone(),
            code,
            args,
        };
        write_frame(&mut stdin, &execute_frame).await?;
        let stdin = Arc::new(Mutex::new(stdin));

        let (result_tx, result_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(dispatch_loop(
            execution_id,
            stdout,
            Arc::clone(&stdin),
            handler,
            result_tx,
        ));

        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(stderr));
        }

        Ok(Self {
            child,
            result_rx: Some(result_rx),
            dispatcher,
        })
    }

    /// Race the sandbox's result against `timeout`. On timeout the
    /// subprocess is killed and `EXECUTION_TIMEOUT` is returned, matching
    /// spec §4.8: "the Orchestrator is responsible for terminating the
    /// sandbox".
    pub async fn execute(&mut self, timeout: Duration) -> Result<serde_json::Value, BridgeError> {
        let rx = self.result_rx.take().ok_or(BridgeError::BridgeClosed)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::BridgeClosed),
            Err(_) => {
                self.terminate().await;
                Err(BridgeError::ExecutionTimeout)
            }
        }
    }

    /// Explicit external cancellation (spec: `cancelExecution`). Terminates
    /// the sandbox without waiting for a reply.
    pub async fn cancel(&mut self) {
        self.terminate().await;
    }

    /// Kill the subprocess and stop the dispatcher. Idempotent.
    pub async fn terminate(&mut self) {
        self.dispatcher.abort();
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

async fn dispatch_loop(
    execution_id: String,
    stdout: tokio::process::ChildStdout,
    stdin: Arc<Mutex<ChildStdin>>,
    handler: Arc<dyn RpcHandler>,
    result_tx: oneshot::Sender<Result<serde_json::Value, BridgeError>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut result_tx = Some(result_tx);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                if let Some(tx) = result_tx.take() {
                    let _ = tx.send(Err(BridgeError::WorkerTerminated(
                        "sandbox closed its output stream".to_string(),
                    )));
                }
                return;
            }
            Err(err) => {
                if let Some(tx) = result_tx.take() {
                    let _ = tx.send(Err(BridgeError::WorkerTerminated(err.to_string())));
                }
                return;
            }
        };

        let frame: SandboxFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(execution_id = %execution_id, error = %err, "malformed sandbox frame, dropping");
                continue;
            }
        };

        match frame {
            SandboxFrame::Result { value, .. } => {
                if let Some(tx) = result_tx.take() {
                    let _ = tx.send(Ok(value));
                }
                return;
            }
            SandboxFrame::Error { error, code, .. } => {
                let classified = match code.as_str() {
                    "PERMISSION_DENIED" => BridgeError::PermissionDenied(error),
                    _ => BridgeError::CodeError(error),
                };
                if let Some(tx) = result_tx.take() {
                    let _ = tx.send(Err(classified));
                }
                return;
            }
            SandboxFrame::Rpc { rpc_id, method, args } => {
                let handler = Arc::clone(&handler);
                let stdin = Arc::clone(&stdin);
                let rpc_id_for_task = rpc_id.clone();
                tokio::spawn(async move {
                    let reply = match handler.handle(&method, args).await {
                        Ok(result) => SandboxFrame::RpcResponse {
                            id: rpc_id_for_task.clone(),
                            result,
                        },
                        Err(error) => SandboxFrame::RpcError {
                            id: rpc_id_for_task.clone(),
                            error,
                        },
                    };
                    let mut stdin = stdin.lock().await;
                    // If the execute already resolved (bridge closing), the
                    // write below may fail because the child exited — drop
                    // it silently per spec §4.8 ("drop the response silently").
                    let _ = write_frame(&mut stdin, &reply).await;
                });
            }
            SandboxFrame::Execute { .. } | SandboxFrame::RpcResponse { .. } | SandboxFrame::RpcError { .. } => {
                tracing::warn!(execution_id = %execution_id, "unexpected frame direction from sandbox, ignoring");
            }
        }
    }
}

async fn forward_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "sandbox", "{line}");
    }
}

async fn write_frame(stdin: &mut ChildStdin, frame: &SandboxFrame) -> Result<()> {
    let mut line = serde_json::to_string(frame).context("failed to serialize sandbox frame")?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await.context("failed to write sandbox frame")?;
    stdin.flush().await.context("failed to flush sandbox frame")?;
    Ok(())
}

/// Resolve `pml-sandbox-runner`'s path as a sibling of the current
/// executable (both binaries are produced into the same Cargo target
/// directory). Test binaries run one level down, in `target/<profile>/deps/`,
/// so a `<profile>/deps/../pml-sandbox-runner` candidate is tried next.
pub fn default_runner_path() -> Result<PathBuf> {
    let current = std::env::current_exe().context("failed to resolve current executable path")?;
    let dir = current.parent().context("executable has no parent directory")?;

    let sibling = dir.join(pml_sandbox::RUNNER_BIN_NAME);
    if sibling.exists() {
        return Ok(sibling);
    }
    if let Some(profile_dir) = dir.parent() {
        let candidate = profile_dir.join(pml_sandbox::RUNNER_BIN_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Ok(sibling)
}
