/// Gateway-wide error taxonomy.
///
/// Each variant's `code()` is the stable string surfaced to callers (sandbox
/// error envelopes, HTTP error bodies, log fields) so downstream consumers
/// can match on it without parsing the display message.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("transport closed")]
    TransportClosed,

    #[error("failed to parse frame: {0}")]
    FrameParseError(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("server '{0}' process died")]
    ServerDied(String),

    #[error("call to '{method}' timed out after {timeout_ms}ms")]
    RpcTimeout { method: String, timeout_ms: u64 },

    #[error("peer returned error: {0}")]
    RpcError(String),

    #[error("tool '{tool}' inputSchema rejected by metaschema: {reason}")]
    SchemaInvalid { tool: String, reason: String },

    #[error("execution timed out after {0}ms")]
    ExecutionTimeout(u64),

    #[error("tool '{0}' is permission-denied")]
    PermissionDenied(String),

    #[error("missing required API key(s): {0:?}")]
    ApiKeyRequired(Vec<String>),

    #[error("cloud request failed: {0}")]
    CloudError(String),

    #[error("trace sync rate limited, retry after {retry_after_secs:?}s")]
    SyncRateLimited { retry_after_secs: Option<u64> },

    #[error("trace dropped after exhausting retry budget")]
    TraceDropped,

    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("referenced environment variable '{0}' is unset")]
    MissingEnv(String),

    #[error("server '{0}' did not complete initialize within the deadline")]
    InitTimeout(String),
}

impl GatewayError {
    /// Stable machine-readable code, as named in the error table.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransportClosed => "TRANSPORT_CLOSED",
            Self::FrameParseError(_) => "FRAME_PARSE_ERROR",
            Self::WriteFailed(_) => "WRITE_FAILED",
            Self::ServerDied(_) => "SERVER_DIED",
            Self::RpcTimeout { .. } => "RPC_TIMEOUT",
            Self::RpcError(_) => "RPC_ERROR",
            Self::SchemaInvalid { .. } => "SCHEMA_INVALID",
            Self::ExecutionTimeout(_) => "EXECUTION_TIMEOUT",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::ApiKeyRequired(_) => "API_KEY_REQUIRED",
            Self::CloudError(_) => "CLOUD_ERROR",
            Self::SyncRateLimited { .. } => "SYNC_RATE_LIMITED",
            Self::TraceDropped => "TRACE_DROPPED",
            Self::ConfigInvalid(_) => "CONFIG_INVALID",
            Self::MissingEnv(_) => "MISSING_ENV",
            Self::InitTimeout(_) => "INIT_TIMEOUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_matches_table() {
        assert_eq!(GatewayError::TransportClosed.code(), "TRANSPORT_CLOSED");
        assert_eq!(
            GatewayError::RpcTimeout {
                method: "tools/call".into(),
                timeout_ms: 500,
            }
            .code(),
            "RPC_TIMEOUT"
        );
        assert_eq!(
            GatewayError::ApiKeyRequired(vec!["OPENAI_API_KEY".into()]).code(),
            "API_KEY_REQUIRED"
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = GatewayError::SchemaInvalid {
            tool: "scope.proj.ns.action".into(),
            reason: "type must be object".into(),
        };
        assert!(err.to_string().contains("scope.proj.ns.action"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GatewayError>();
    }
}
