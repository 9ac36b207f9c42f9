//! Tool Router (spec §4.5) exposed as an `rmcp` `ServerHandler`.
//!
//! Forwards `tools/list`/`tools/call` to the owning backend server, and
//! additionally exposes the gateway's own orchestration entrypoint,
//! `pml:execute`, for hosts that speak MCP but want sandboxed multi-tool
//! execution rather than calling one tool at a time (spec §4.9). The
//! orchestrator itself lives outside this crate to avoid a dependency
//! cycle, so it is injected as a trait object.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ListToolsResult, PaginatedRequestParams,
    ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::registry::McpRegistry;

/// Name of the gateway's own orchestration tool (spec §6: "the special
/// `pml:execute` tool").
pub const EXECUTE_TOOL_NAME: &str = "pml:execute";

/// Injected handler for the `pml:execute` tool. Implemented outside this
/// crate by whatever wires up the Sandbox Runtime, RPC Bridge, and
/// Execution Orchestrator.
#[async_trait]
pub trait ExecuteHandler: Send + Sync {
    async fn execute(&self, arguments: Option<serde_json::Map<String, Value>>)
    -> Result<Value, String>;
}

#[derive(Clone)]
pub(crate) struct ProxyRouter {
    registry: Arc<McpRegistry>,
    tool_routes: Arc<RwLock<HashMap<String, String>>>,
    request_timeout: Duration,
    execute_handler: Option<Arc<dyn ExecuteHandler>>,
}

impl ProxyRouter {
    pub(crate) fn new(registry: Arc<McpRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            tool_routes: Arc::new(RwLock::new(HashMap::new())),
            request_timeout,
            execute_handler: None,
        }
    }

    pub(crate) fn with_execute_handler(mut self, handler: Arc<dyn ExecuteHandler>) -> Self {
        self.execute_handler = Some(handler);
        self
    }

    async fn list_tools_internal(&self) -> Result<ListToolsResult, McpError> {
        let mut tools = Vec::new();
        let mut routes = HashMap::new();

        for server in self.registry.server_names().await {
            let cancellation = CancellationToken::new();
            match timeout(
                self.request_timeout,
                self.registry.list_tools(&server, cancellation.clone()),
            )
            .await
            {
                Ok(Ok(server_tools)) => {
                    for tool in server_tools {
                        routes.insert(tool.name.to_string(), server.clone());
                        tools.push(tool);
                    }
                }
                Ok(Err(error)) => {
                    tracing::warn!(server = %server, error = %error, "tools/list forwarding failed");
                }
                Err(_) => {
                    cancellation.cancel();
                    tracing::warn!(
                        server = %server,
                        timeout_secs = self.request_timeout.as_secs(),
                        "tools/list forwarding timed out"
                    );
                }
            }
        }

        *self.tool_routes.write().await = routes;

        if self.execute_handler.is_some() {
            tools.push(execute_tool_definition());
        }

        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool_internal(
        &self,
        request: CallToolRequestParams,
    ) -> Result<CallToolResult, McpError> {
        let tool_name = request.name.as_ref();

        if tool_name == EXECUTE_TOOL_NAME {
            return self.call_execute(request).await;
        }

        let mut server = self.lookup_tool_owner(tool_name).await;

        if server.is_none() {
            self.list_tools_internal().await?;
            server = self.lookup_tool_owner(tool_name).await;
        }

        let Some(server_name) = server else {
            return Err(McpError::invalid_params(
                format!("unknown MCP tool: {tool_name}"),
                None,
            ));
        };

        let cancellation = CancellationToken::new();
        match timeout(
            self.request_timeout,
            self.registry.call_tool(&server_name, request, cancellation.clone()),
        )
        .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(McpError::internal_error(
                format!("forwarding to MCP server '{server_name}' failed: {error}"),
                None,
            )),
            Err(_) => {
                cancellation.cancel();
                Err(McpError::internal_error(
                    format!(
                        "forwarding to MCP server '{server_name}' timed out after {}s",
                        self.request_timeout.as_secs()
                    ),
                    None,
                ))
            }
        }
    }

    async fn call_execute(
        &self,
        request: CallToolRequestParams,
    ) -> Result<CallToolResult, McpError> {
        let Some(handler) = &self.execute_handler else {
            return Err(McpError::invalid_params(
                format!("unknown MCP tool: {EXECUTE_TOOL_NAME}"),
                None,
            ));
        };

        match handler.execute(request.arguments).await {
            Ok(value) => Ok(CallToolResult::success(vec![Content::text(
                serde_json::to_string(&value).unwrap_or_default(),
            )])),
            Err(error) => Err(McpError::internal_error(error, None)),
        }
    }

    async fn lookup_tool_owner(&self, tool_name: &str) -> Option<String> {
        self.tool_routes.read().await.get(tool_name).cloned()
    }
}

fn execute_tool_definition() -> Tool {
    Tool::new(
        EXECUTE_TOOL_NAME,
        "Run sandboxed orchestration code that can call other discovered MCP tools \
         through the host's bridge, collecting their results and UI resources.",
        Arc::new(
            json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "Sandbox script source"},
                    "workflowId": {
                        "type": "string",
                        "description": "Continues a paused human-in-the-loop execution"
                    }
                },
                "required": ["code"]
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
        ),
    )
}

impl ServerHandler for ProxyRouter {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        self.list_tools_internal().await
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.call_tool_internal(request).await
    }

    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.server_info.name = "pml-gateway".to_string();
        info.server_info.version = env!("CARGO_PKG_VERSION").to_string();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use pml_config::{McpServerConfig, McpTransport};
    use rmcp::model::CallToolRequestParams;
    use serde_json::json;

    use crate::proxy::{ExecuteHandler, ProxyRouter};
    use crate::registry::McpRegistry;

    fn write_script(dir: &std::path::Path) -> Result<std::path::PathBuf> {
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
    *\"notifications/initialized\"*)
      ;;
    *\"tools/list\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo_tool","description":"echo","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id"
      ;;
    *\"tools/call\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id"
      ;;
  esac
done
"#,
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms)?;
        }

        Ok(path)
    }

    fn registry_with_mock(temp: &tempfile::TempDir) -> Result<Arc<McpRegistry>> {
        let script = write_script(temp.path())?;
        Ok(Arc::new(McpRegistry::new(vec![McpServerConfig {
            name: "mock".to_string(),
            transport: McpTransport::Stdio {
                command: "sh".to_string(),
                args: vec![script.to_string_lossy().into_owned()],
                env: HashMap::new(),
            },
            stateful: false,
            memory_max_mb: None,
        }])))
    }

    #[tokio::test]
    async fn tools_list_and_call_are_forwarded() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let registry = registry_with_mock(&temp)?;
        let router = ProxyRouter::new(registry.clone(), Duration::from_secs(5));

        let list_response = router.list_tools_internal().await?;
        assert_eq!(list_response.tools[0].name.as_ref(), "echo_tool");

        let call_response = router
            .call_tool_internal(
                CallToolRequestParams::new("echo_tool").with_arguments(
                    json!({"value":"ping"})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                ),
            )
            .await?;

        assert_eq!(
            call_response.content[0].as_text().map(|t| t.text.as_str()),
            Some("pong")
        );

        registry.shutdown_all().await?;
        Ok(())
    }

    struct EchoExecuteHandler;

    #[async_trait::async_trait]
    impl ExecuteHandler for EchoExecuteHandler {
        async fn execute(
            &self,
            arguments: Option<serde_json::Map<String, serde_json::Value>>,
        ) -> Result<serde_json::Value, String> {
            Ok(json!({"received": arguments}))
        }
    }

    #[tokio::test]
    async fn execute_tool_is_listed_and_dispatched_when_handler_present() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let registry = registry_with_mock(&temp)?;
        let router = ProxyRouter::new(registry.clone(), Duration::from_secs(5))
            .with_execute_handler(Arc::new(EchoExecuteHandler));

        let list_response = router.list_tools_internal().await?;
        assert!(
            list_response
                .tools
                .iter()
                .any(|t| t.name.as_ref() == "pml:execute")
        );

        let call_response = router
            .call_tool_internal(
                CallToolRequestParams::new("pml:execute").with_arguments(
                    json!({"code": "1 + 1"}).as_object().cloned().unwrap_or_default(),
                ),
            )
            .await?;
        assert!(call_response.content[0].as_text().unwrap().text.contains("received"));

        registry.shutdown_all().await?;
        Ok(())
    }

    #[tokio::test]
    async fn execute_tool_unknown_without_handler() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let registry = registry_with_mock(&temp)?;
        let router = ProxyRouter::new(registry.clone(), Duration::from_secs(5));

        let err = router
            .call_tool_internal(CallToolRequestParams::new("pml:execute"))
            .await
            .unwrap_err();
        assert!(err.message.contains("unknown MCP tool"));

        registry.shutdown_all().await?;
        Ok(())
    }
}
