//! The embedded script engine that runs inside the sandboxed subprocess
//! (spec §4.7). Uses `rhai` because it registers zero I/O functions by
//! default — "zero ambient authority" is the VM's native behavior, not a
//! policy layered on top.
//!
//! Glue code sees no dynamic `mcp` object (rhai has no property-access
//! interception hook); per the Design Note in spec §9 ("represent `mcp` as
//! an interface whose method dispatch goes through a single
//! `invoke(namespace, action, args)`"), it instead calls a single global
//! function `mcp_call(namespace, action, args)`.

use std::sync::{Arc, Mutex};

use rhai::{Dynamic, Engine, Scope};

/// One `mcp.<namespace>.<action>(args)` invocation, synchronously resolved
/// by whatever sits on the other end of the sandbox's message port (in
/// production, `pml-bridge`'s NDJSON round trip to the host).
pub trait McpCall: Send {
    fn call(&mut self, method: &str, args: serde_json::Value) -> Result<serde_json::Value, McpCallError>;
}

/// An `mcp_call` failure, distinguishing a policy rejection (spec:
/// `PERMISSION_DENIED`) from every other failure (`CODE_ERROR`).
#[derive(Debug, Clone)]
pub struct McpCallError {
    pub message: String,
    pub permission_denied: bool,
}

impl McpCallError {
    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permission_denied: true,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permission_denied: false,
        }
    }
}

/// Sandbox execution failure, tagged with the error code from spec §4.7's
/// `{type: "error", id, error, code}` frame.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    CodeError(String),
}

impl SandboxError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::CodeError(_) => "CODE_ERROR",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::PermissionDenied(m) | Self::CodeError(m) => m,
        }
    }
}

/// A sentinel rhai raises as a runtime error to signal that the underlying
/// `mcp_call` was permission-denied, so [`execute`] can classify it as
/// `PERMISSION_DENIED` rather than a generic `CODE_ERROR`.
const PERMISSION_DENIED_MARKER: &str = "\u{0}mcp_permission_denied\u{0}";

/// Run `code` with `args` bound in scope, dispatching every `mcp_call`
/// through `mcp`. `code` is evaluated as a single expression/script body
/// whose final value is the execution's result, matching spec §4.7's
/// "compiles the code as the body of an async function ... and awaits its
/// return" (rhai has no async; calls through `mcp` block synchronously,
/// which is transparent to the glue code).
pub fn execute(
    code: &str,
    args: serde_json::Value,
    mcp: Box<dyn McpCall>,
) -> Result<serde_json::Value, SandboxError> {
    let mcp = Arc::new(Mutex::new(mcp));

    let mut engine = Engine::new();
    engine.set_max_operations(10_000_000);
    engine.set_max_expr_depths(128, 32);

    let mcp_for_fn = Arc::clone(&mcp);
    engine.register_fn(
        "mcp_call",
        move |namespace: &str, action: &str, call_args: Dynamic| -> Result<Dynamic, Box<rhai::EvalAltResult>> {
            let args_json: serde_json::Value = rhai::serde::from_dynamic(&call_args)?;
            let method = format!("{namespace}:{action}");
            let mut guard = mcp_for_fn.lock().expect("mcp_call mutex poisoned");
            match guard.call(&method, args_json) {
                Ok(result) => rhai::serde::to_dynamic(&result),
                Err(err) if err.permission_denied => {
                    Err(format!("{PERMISSION_DENIED_MARKER}{}", err.message).into())
                }
                Err(err) => Err(err.message.into()),
            }
        },
    );

    let args_dynamic = rhai::serde::to_dynamic(&args)
        .map_err(|e| SandboxError::CodeError(format!("failed to bind args: {e}")))?;
    let mut scope = Scope::new();
    scope.push("args", args_dynamic);

    let result: Dynamic = engine
        .eval_with_scope(&mut scope, code)
        .map_err(|err| classify_eval_error(*err))?;

    rhai::serde::from_dynamic::<serde_json::Value>(&result)
        .map_err(|e| SandboxError::CodeError(format!("failed to serialize result: {e}")))
}

fn classify_eval_error(err: rhai::EvalAltResult) -> SandboxError {
    let message = err.to_string();
    if let Some(stripped) = message
        .split(PERMISSION_DENIED_MARKER)
        .nth(1)
        .map(str::to_string)
    {
        SandboxError::PermissionDenied(stripped)
    } else {
        SandboxError::CodeError(message)
    }
}
