//! Public facade over the registry + router, handed to the Execution
//! Orchestrator (which lives in a separate crate to avoid a dependency
//! cycle with the `pml:execute` tool it implements for [`crate::proxy`]).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pml_core::GatewayError;
use rmcp::model::{CallToolRequestParams, Content};
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::discovery::{self, DiscoverySummary};
use crate::registry::McpRegistry;
use crate::router::{Router, RouteTarget};

/// Env var the Cloud RPC client reads its API key from (spec §6).
pub const CLOUD_API_KEY_ENV: &str = "PML_API_KEY";

/// Everything an `mcp.<namespace>.<action>(args)` call from inside a sandbox
/// needs, minus the permission and key-gate checks the orchestrator layers
/// on top.
pub struct GatewayHandle {
    registry: Arc<McpRegistry>,
    router: Router,
    cloud_url: Option<String>,
    http: reqwest::Client,
}

impl GatewayHandle {
    /// Build directly from the declarative config's server list (the entry
    /// point external crates — the Execution Orchestrator — use, since the
    /// registry type itself stays crate-private).
    pub async fn from_server_configs(
        configs: Vec<pml_config::McpServerConfig>,
        cloud_url: Option<String>,
    ) -> Self {
        Self::with_cloud_url(Arc::new(McpRegistry::new(configs)), cloud_url).await
    }

    pub(crate) async fn with_cloud_url(registry: Arc<McpRegistry>, cloud_url: Option<String>) -> Self {
        let local_servers: HashSet<String> = registry.server_names().await.into_iter().collect();
        Self {
            registry,
            router: Router::new(local_servers),
            cloud_url,
            http: reqwest::Client::new(),
        }
    }

    pub async fn server_names(&self) -> Vec<String> {
        self.registry.server_names().await
    }

    /// Static credential mapping the Key Gate (spec §4.6) checks before a
    /// sandboxed execution runs.
    pub async fn key_requirements(&self) -> Vec<pml_core::KeyRequirementRecord> {
        self.registry.key_requirements().await
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.registry.shutdown_all().await
    }

    /// Route decision for `namespace:action` or FQDN tool identifiers
    /// (spec §4.5: "resolveToolRouting").
    pub fn resolve_routing(&self, tool_id: &str) -> RouteTarget {
        self.router.resolve(tool_id)
    }

    /// `routeCall` (spec §4.5): dispatch to the locally configured server or
    /// forward to the cloud, whichever [`resolve_routing`] picked.
    pub async fn call(
        &self,
        tool_id: &str,
        args: Value,
        request_timeout: Duration,
    ) -> Result<Value, GatewayError> {
        match self.resolve_routing(tool_id) {
            RouteTarget::Client { server_name, action } => {
                self.call_client_tool(&server_name, &action, args, request_timeout).await
            }
            RouteTarget::Cloud => self.call_cloud_tool(tool_id, args, request_timeout).await,
        }
    }

    /// POST `<cloudUrl>/mcp` with a `tools/call` JSON-RPC envelope and an
    /// `x-api-key` header (spec §4.5, §6).
    async fn call_cloud_tool(
        &self,
        tool_id: &str,
        args: Value,
        request_timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let Some(cloud_url) = &self.cloud_url else {
            return Err(GatewayError::CloudError(
                "no cloudUrl configured for server-routed tool call".to_string(),
            ));
        };
        let api_key = std::env::var(CLOUD_API_KEY_ENV).unwrap_or_default();

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": tool_id, "arguments": args},
        });

        let response = timeout(
            request_timeout,
            self.http
                .post(format!("{cloud_url}/mcp"))
                .header("x-api-key", api_key)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| GatewayError::RpcTimeout {
            method: tool_id.to_string(),
            timeout_ms: request_timeout.as_millis() as u64,
        })?
        .map_err(|error| GatewayError::CloudError(error.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::CloudError(format!(
                "cloud returned HTTP {}",
                response.status()
            )));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|error| GatewayError::CloudError(error.to_string()))?;

        if let Some(error) = envelope.get("error") {
            return Err(GatewayError::RpcError(error.to_string()));
        }
        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Dispatch a resolved local call, converting the MCP `CallToolResult`
    /// content into a plain JSON value for the sandbox to consume.
    pub async fn call_client_tool(
        &self,
        server_name: &str,
        action: &str,
        args: Value,
        request_timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let arguments = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let request = CallToolRequestParams::new(action.to_string()).with_arguments(arguments);
        let cancellation = CancellationToken::new();

        let result = match timeout(
            request_timeout,
            self.registry.call_tool(server_name, request, cancellation.clone()),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => return Err(GatewayError::RpcError(error.to_string())),
            Err(_) => {
                cancellation.cancel();
                return Err(GatewayError::RpcTimeout {
                    method: format!("{server_name}:{action}"),
                    timeout_ms: request_timeout.as_millis() as u64,
                });
            }
        };

        Ok(content_to_value(result.content))
    }

    /// Run discovery across every configured server (spec §4.4).
    pub async fn discover(
        &self,
        per_server_timeout: Duration,
        global_timeout: Duration,
    ) -> DiscoverySummary {
        let servers = self.registry.server_names().await;
        discovery::discover_all(Arc::clone(&self.registry), &servers, per_server_timeout, global_timeout).await
    }
}

fn content_to_value(content: Vec<Content>) -> Value {
    let Some(first) = content.into_iter().next() else {
        return Value::Null;
    };
    let Some(text) = first.as_text() else {
        return Value::Null;
    };
    serde_json::from_str(&text.text).unwrap_or_else(|_| Value::String(text.text.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    use pml_config::{McpServerConfig, McpTransport};

    fn write_script(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("mock-mcp.sh");
        fs::write(
            &path,
            r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"0.1.0"}}}\n' "$id"
      ;;
    *\"notifications/initialized\"*) ;;
    *\"tools/call\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"{\\"ok\\":true}"}]}}\n' "$id"
      ;;
  esac
done
"#,
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn call_client_tool_routes_through_registry_and_parses_json_content() {
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(temp.path());
        let registry = Arc::new(McpRegistry::new(vec![McpServerConfig {
            name: "mock".to_string(),
            transport: McpTransport::Stdio {
                command: "sh".to_string(),
                args: vec![script.to_string_lossy().into_owned()],
                env: HashMap::new(),
            },
            stateful: false,
            memory_max_mb: None,
        }]));
        let handle = GatewayHandle::with_cloud_url(registry.clone(), None).await;

        assert!(matches!(
            handle.resolve_routing("mock:anything"),
            RouteTarget::Client { .. }
        ));

        let value = handle
            .call_client_tool("mock", "anything", serde_json::json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({"ok": true}));

        registry.shutdown_all().await.unwrap();
    }
}
