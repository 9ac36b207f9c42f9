//! Sandbox runner subprocess entry point (spec §4.7).
//!
//! Spawned fresh per execution by `pml-bridge`: applies `landlock`
//! confinement (defense in depth on top of the engine's own lack of I/O
//! bindings), reads exactly one `Execute` frame from stdin, runs it, writes
//! back `Result`/`Error`, and exits. `mcp.*` calls block on a synchronous
//! NDJSON round trip over the same stdio pipes.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use pml_sandbox::engine::{McpCall, McpCallError};
use pml_sandbox::frame::SandboxFrame;

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    apply_confinement();

    // Scoped so the stdin lock is released before `StdioMcpCall` takes its
    // own lock per round trip — `Stdin`'s internal mutex isn't reentrant,
    // so holding both at once would deadlock the first `mcp_call`.
    let first_line = {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        let Some(Ok(first_line)) = lines.next() else {
            tracing::error!("sandbox runner got no input; exiting");
            std::process::exit(1);
        };
        first_line
    };

    let frame: SandboxFrame = match serde_json::from_str(&first_line) {
        Ok(f) => f,
        Err(err) => {
            tracing::error!(error = %err, "malformed execute frame");
            std::process::exit(1);
        }
    };

    let SandboxFrame::Execute { id, code, args } = frame else {
        tracing::error!("expected an execute frame first");
        std::process::exit(1);
    };

    let mcp = StdioMcpCall::new();
    let response = match pml_sandbox::engine::execute(&code, args, Box::new(mcp)) {
        Ok(value) => SandboxFrame::Result { id, value },
        Err(err) => SandboxFrame::Error {
            id,
            error: err.message().to_string(),
            code: err.code().to_string(),
        },
    };

    write_frame(&response);
}

/// Restrict the runner to zero filesystem access. Best-effort: a kernel
/// without Landlock support falls back to the engine's own I/O-free
/// registration surface, which is the primary confinement mechanism anyway.
fn apply_confinement() {
    match pml_resource::landlock_policy::apply_landlock(&[]) {
        Ok(outcome) => tracing::debug!(?outcome, "sandbox runner landlock confinement applied"),
        Err(err) => tracing::warn!(error = %err, "sandbox runner landlock confinement unavailable"),
    }
}

fn write_frame(frame: &SandboxFrame) {
    let line = serde_json::to_string(frame).expect("sandbox frame is serializable");
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
    let _ = stdout.flush();
}

/// Synchronous `mcp_call` bridge over this process's own stdio: send an
/// `Rpc` frame, block reading stdin for the correlated `RpcResponse` /
/// `RpcError`.
struct StdioMcpCall {
    next_id: AtomicU64,
}

impl StdioMcpCall {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

impl McpCall for StdioMcpCall {
    fn call(&mut self, method: &str, args: serde_json::Value) -> Result<serde_json::Value, McpCallError> {
        let rpc_id = format!("rpc-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        write_frame(&SandboxFrame::Rpc {
            rpc_id: rpc_id.clone(),
            method: method.to_string(),
            args,
        });

        let stdin = std::io::stdin();
        loop {
            let mut line = String::new();
            let read = stdin
                .lock()
                .read_line(&mut line)
                .map_err(|e| McpCallError::other(format!("failed to read rpc reply: {e}")))?;
            if read == 0 {
                return Err(McpCallError::other("host closed the bridge mid-call"));
            }

            let frame: SandboxFrame = match serde_json::from_str(line.trim_end()) {
                Ok(f) => f,
                Err(_) => continue,
            };

            match frame {
                SandboxFrame::RpcResponse { id, result } if id == rpc_id => return Ok(result),
                SandboxFrame::RpcError { id, error } if id == rpc_id => {
                    return Err(McpCallError::other(error));
                }
                _ => continue,
            }
        }
    }
}
