//! NDJSON wire frames exchanged between the host (`pml-bridge`) and the
//! sandbox subprocess (spec §4.7/§4.8). One frame per line.

use serde::{Deserialize, Serialize};

/// One frame of the sandbox's message-port protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxFrame {
    /// Host → sandbox: run `code` with `args`, the body of an async function
    /// `(mcp, args)` (spec §4.7).
    Execute {
        id: String,
        code: String,
        args: serde_json::Value,
    },
    /// Sandbox → host: `code` completed, returning `value`.
    Result {
        id: String,
        value: serde_json::Value,
    },
    /// Sandbox → host: `code` raised an error. `code` is one of
    /// `PERMISSION_DENIED` / `CODE_ERROR`.
    Error {
        id: String,
        error: String,
        code: String,
    },
    /// Sandbox → host: an `mcp.<namespace>.<action>(args)` call, intercepted
    /// and forwarded through `mcp_call` (spec §4.7/§4.8).
    Rpc {
        rpc_id: String,
        method: String,
        args: serde_json::Value,
    },
    /// Host → sandbox: successful reply to a pending `Rpc`.
    RpcResponse {
        id: String,
        result: serde_json::Value,
    },
    /// Host → sandbox: failed reply to a pending `Rpc`.
    RpcError { id: String, error: String },
}
