//! Subprocess Supervisor (spec §4.2) + MCP Client Multiplexer (spec §4.3).
//!
//! One [`ServerQueueHandle`] actor per configured server owns that server's
//! [`BackendTransport`] exclusively; all calls for that server funnel through
//! its single-consumer queue, so writes are naturally serialised the way the
//! Transport requires (spec §4.1: "Writes are serialised per process").
//! Respawn-on-failure with exponential backoff lives in [`ManagedServer`].

#[cfg(feature = "transport-http-client")]
#[path = "registry_http.rs"]
mod registry_http;

use anyhow::{Context, Result, anyhow};
use pml_config::McpServerConfig;
use pml_core::KeyRequirementRecord;
use pml_resource::cgroup::{CgroupScopeGuard, SandboxConfig, create_scope_command};
use pml_resource::rlimit::{RssWatcher, apply_rlimits};
use pml_resource::sandbox::{SandboxCapability, detect_sandbox_capability};
use rmcp::RoleClient;
use rmcp::model::{CallToolRequestParams, CallToolResult, Tool};
use rmcp::service::{RunningService, ServiceExt};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "transport-http-client")]
use registry_http::{preflight_ssrf_check, validate_http_url};

const RESTART_BACKOFF_INITIAL_MS: u64 = 100;
const RESTART_BACKOFF_MAX_MS: u64 = 30_000;
const MCP_SANDBOX_MEMORY_MAX_MB: u64 = 2048;
const MCP_SANDBOX_MEMORY_SWAP_MAX_MB: Option<u64> = Some(0);
const MCP_SANDBOX_PIDS_MAX: Option<u32> = None;
const MCP_SANDBOX_SESSION_ID: &str = "pml-gateway";
const SHUTDOWN_GRACE_SECS: u64 = 2;
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Tracks one [`ServerQueueHandle`] per configured server name (spec §3:
/// "at most one live process per server name"). The map lives behind a
/// `RwLock` rather than `&mut self` so the Config Watcher (spec §4.11) can
/// upsert/remove servers through the same `Arc<McpRegistry>` every caller
/// already holds, without a restart.
pub(crate) struct McpRegistry {
    servers: RwLock<HashMap<String, Arc<ServerQueueHandle>>>,
    configs: RwLock<HashMap<String, McpServerConfig>>,
}

impl McpRegistry {
    pub(crate) fn new(configs: Vec<McpServerConfig>) -> Self {
        let mut servers = HashMap::new();
        let mut config_map = HashMap::new();
        for config in configs {
            let name = config.name.clone();
            servers.insert(name.clone(), Arc::new(ServerQueueHandle::spawn(config.clone())));
            config_map.insert(name, config);
        }
        Self {
            servers: RwLock::new(servers),
            configs: RwLock::new(config_map),
        }
    }

    pub(crate) async fn server_names(&self) -> Vec<String> {
        self.servers.read().await.keys().cloned().collect()
    }

    /// Add or replace a server record (spec §4.11: "a changed server is
    /// stopped and respawned with its new config").
    pub(crate) async fn upsert(&self, config: McpServerConfig) {
        let name = config.name.clone();
        let previous = self
            .servers
            .write()
            .await
            .insert(name.clone(), Arc::new(ServerQueueHandle::spawn(config.clone())));
        self.configs.write().await.insert(name, config);
        if let Some(previous) = previous {
            let _ = previous.shutdown().await;
        }
    }

    /// Remove and shut down a server by name (used by the Config Watcher).
    pub(crate) async fn remove(&self, server_name: &str) -> Result<()> {
        let removed = self.servers.write().await.remove(server_name);
        self.configs.write().await.remove(server_name);
        if let Some(handle) = removed {
            handle.shutdown().await?;
        }
        Ok(())
    }

    /// Static credential mapping the Key Gate (spec §4.6) checks before a
    /// sandboxed execution runs: every `${VAR}` placeholder any configured
    /// server's `env` map references, attributed to that server.
    pub(crate) async fn key_requirements(&self) -> Vec<KeyRequirementRecord> {
        self.configs
            .read()
            .await
            .values()
            .flat_map(|config| {
                config
                    .required_env_vars()
                    .into_iter()
                    .map(|env_var_name| KeyRequirementRecord {
                        env_var_name,
                        required_by_tool: config.name.clone(),
                    })
            })
            .collect()
    }

    pub(crate) async fn list_tools(
        &self,
        server_name: &str,
        cancellation: CancellationToken,
    ) -> Result<Vec<Tool>> {
        let handle = self
            .servers
            .read()
            .await
            .get(server_name)
            .cloned()
            .with_context(|| format!("unknown MCP server: {server_name}"))?;
        handle.list_tools(cancellation).await
    }

    pub(crate) async fn call_tool(
        &self,
        server_name: &str,
        request: CallToolRequestParams,
        cancellation: CancellationToken,
    ) -> Result<CallToolResult> {
        let handle = self
            .servers
            .read()
            .await
            .get(server_name)
            .cloned()
            .with_context(|| format!("unknown MCP server: {server_name}"))?;
        handle.call_tool(request, cancellation).await
    }

    pub(crate) async fn shutdown_all(&self) -> Result<()> {
        for handle in self.servers.read().await.values() {
            handle.shutdown().await?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct ServerQueueHandle {
    server_name: String,
    sender: mpsc::Sender<QueueCommand>,
}

enum QueueCommandKind {
    ListTools,
    CallTool(CallToolRequestParams),
    Shutdown,
}

struct QueueCommand {
    kind: QueueCommandKind,
    cancellation: CancellationToken,
    response: oneshot::Sender<Result<QueueResponse>>,
}

enum QueueResponse {
    ListTools(Vec<Tool>),
    CallTool(CallToolResult),
    Shutdown,
}

impl ServerQueueHandle {
    fn spawn(config: McpServerConfig) -> Self {
        let server_name = config.name.clone();
        let (sender, mut receiver) = mpsc::channel::<QueueCommand>(REQUEST_QUEUE_CAPACITY);
        let queue_server_name = server_name.clone();

        tokio::spawn(async move {
            let mut server = ManagedServer::new(config);

            while let Some(command) = receiver.recv().await {
                match command.kind {
                    QueueCommandKind::Shutdown => {
                        let _ = command.response.send(Ok(QueueResponse::Shutdown));
                        break;
                    }
                    QueueCommandKind::ListTools => {
                        let result = Self::run_queue_dispatch(command.cancellation, async {
                            server.list_tools().await.map(QueueResponse::ListTools)
                        })
                        .await;
                        let _ = command.response.send(result);
                    }
                    QueueCommandKind::CallTool(request) => {
                        let result = Self::run_queue_dispatch(command.cancellation, async {
                            server.call_tool(request).await.map(QueueResponse::CallTool)
                        })
                        .await;
                        let _ = command.response.send(result);
                    }
                }
            }

            if let Err(error) = server.shutdown().await {
                tracing::warn!(server = %queue_server_name, error = %error, "failed to shutdown MCP server queue");
            }
        });

        Self {
            server_name,
            sender,
        }
    }

    async fn run_queue_dispatch<F>(
        cancellation: CancellationToken,
        action: F,
    ) -> Result<QueueResponse>
    where
        F: std::future::Future<Output = Result<QueueResponse>>,
    {
        tokio::select! {
            _ = cancellation.cancelled() => Err(anyhow!("MCP request cancelled before dispatch")),
            response = action => response,
        }
    }

    async fn list_tools(&self, cancellation: CancellationToken) -> Result<Vec<Tool>> {
        match self
            .request(QueueCommandKind::ListTools, cancellation)
            .await?
        {
            QueueResponse::ListTools(tools) => Ok(tools),
            QueueResponse::CallTool(_) => Err(anyhow!("unexpected queue response: call_tool")),
            QueueResponse::Shutdown => Err(anyhow!("unexpected queue response: shutdown")),
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        cancellation: CancellationToken,
    ) -> Result<CallToolResult> {
        match self
            .request(QueueCommandKind::CallTool(request), cancellation)
            .await?
        {
            QueueResponse::CallTool(response) => Ok(response),
            QueueResponse::ListTools(_) => Err(anyhow!("unexpected queue response: list_tools")),
            QueueResponse::Shutdown => Err(anyhow!("unexpected queue response: shutdown")),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let cancellation = CancellationToken::new();
        let _ = self.request(QueueCommandKind::Shutdown, cancellation).await;
        Ok(())
    }

    async fn request(
        &self,
        kind: QueueCommandKind,
        cancellation: CancellationToken,
    ) -> Result<QueueResponse> {
        if cancellation.is_cancelled() {
            return Err(anyhow!("MCP request cancelled before enqueue"));
        }

        let (response_tx, response_rx) = oneshot::channel();
        let command = QueueCommand {
            kind,
            cancellation: cancellation.clone(),
            response: response_tx,
        };

        tokio::select! {
            _ = cancellation.cancelled() => {
                return Err(anyhow!("MCP request cancelled while waiting for queue slot"));
            }
            send_result = self.sender.send(command) => {
                send_result.with_context(|| format!("MCP server queue stopped: {}", self.server_name))?;
            }
        }

        tokio::select! {
            _ = cancellation.cancelled() => Err(anyhow!("MCP request cancelled while waiting for response")),
            response = response_rx => {
                response.context("MCP queue worker dropped response channel")?
            }
        }
    }
}

/// Respawn-with-backoff wrapper (spec §4.2: "a failed spawn removes the
/// record"; here that's modeled as dropping the transport so the next call
/// re-spawns). A process that dies mid-call surfaces as `SERVER_DIED` to the
/// caller via the generic anyhow chain; the next `list_tools`/`call_tool`
/// respawns transparently.
struct ManagedServer {
    config: McpServerConfig,
    transport: Option<BackendTransport>,
    restart_backoff: Duration,
}

impl ManagedServer {
    fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            transport: None,
            restart_backoff: Duration::from_millis(RESTART_BACKOFF_INITIAL_MS),
        }
    }

    async fn list_tools(&mut self) -> Result<Vec<Tool>> {
        let mut last_err: Option<anyhow::Error> = None;

        for _ in 0..3 {
            if let Err(error) = self.ensure_running().await {
                tracing::warn!(
                    server = %self.config.name,
                    error = %error,
                    "MCP spawn/list_tools failed, restarting"
                );
                last_err = Some(error);
                self.restart_after_failure().await?;
                continue;
            }
            if let Some(transport) = self.transport.as_ref() {
                match transport.service().list_tools(None).await {
                    Ok(response) => {
                        self.restart_backoff = Duration::from_millis(RESTART_BACKOFF_INITIAL_MS);
                        return Ok(response.tools);
                    }
                    Err(error) => {
                        tracing::warn!(
                            server = %self.config.name,
                            error = %error,
                            "MCP list_tools failed, restarting"
                        );
                        last_err = Some(anyhow!(error));
                        self.restart_after_failure().await?;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("MCP list_tools failed without explicit error")))
    }

    async fn call_tool(&mut self, request: CallToolRequestParams) -> Result<CallToolResult> {
        let mut last_err: Option<anyhow::Error> = None;

        for _ in 0..3 {
            if let Err(error) = self.ensure_running().await {
                tracing::warn!(
                    server = %self.config.name,
                    error = %error,
                    "MCP spawn/call_tool failed, restarting"
                );
                last_err = Some(error);
                self.restart_after_failure().await?;
                continue;
            }
            if let Some(transport) = self.transport.as_ref() {
                match transport.service().call_tool(request.clone()).await {
                    Ok(response) => {
                        self.restart_backoff = Duration::from_millis(RESTART_BACKOFF_INITIAL_MS);
                        return Ok(response);
                    }
                    Err(error) => {
                        tracing::warn!(
                            server = %self.config.name,
                            error = %error,
                            "MCP call_tool failed, restarting"
                        );
                        last_err = Some(anyhow!(error));
                        self.restart_after_failure().await?;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("MCP call_tool failed without explicit error")))
    }

    async fn ensure_running(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }

        self.transport = Some(BackendTransport::connect(&self.config).await?);
        Ok(())
    }

    async fn restart_after_failure(&mut self) -> Result<()> {
        if let Some(transport) = self.transport.take() {
            transport.shutdown().await;
        }

        tokio::time::sleep(self.restart_backoff).await;
        self.restart_backoff =
            (self.restart_backoff * 2).min(Duration::from_millis(RESTART_BACKOFF_MAX_MS));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(transport) = self.transport.take() {
            transport.shutdown().await;
        }
        Ok(())
    }
}

/// Unified backend connection to an MCP server.
///
/// Each variant owns its lifecycle independently. The common surface
/// (`service()`, `shutdown()`) delegates to variant-specific behavior.
enum BackendTransport {
    /// Child process communicating over stdio (JSON-RPC on stdin/stdout).
    Stdio {
        service: RunningService<RoleClient, ()>,
        child: Box<tokio::process::Child>,
        _sandbox: ChildSandbox,
    },
    /// Remote MCP server via Streamable HTTP transport.
    #[cfg(feature = "transport-http-client")]
    Http {
        service: RunningService<RoleClient, ()>,
    },
}

impl BackendTransport {
    /// Connect to an MCP server based on the config transport type.
    async fn connect(config: &McpServerConfig) -> Result<Self> {
        match &config.transport {
            pml_config::McpTransport::Stdio { command, args, .. } => {
                let env = config
                    .resolve_env()
                    .map_err(|e| anyhow!("server '{}': {e}", config.name))?;
                Self::spawn_stdio(config, command, args, &env).await
            }
            #[cfg(feature = "transport-http-client")]
            pml_config::McpTransport::Http {
                url,
                allow_insecure,
                ..
            } => Self::connect_http(config, url, *allow_insecure).await,
            #[cfg(not(feature = "transport-http-client"))]
            pml_config::McpTransport::Http { .. } => {
                anyhow::bail!(
                    "server '{}' requires HTTP transport, but pml-mcp was built \
                     without the 'transport-http-client' feature",
                    config.name
                );
            }
        }
    }

    /// Transport-agnostic accessor for the rmcp service.
    fn service(&self) -> &RunningService<RoleClient, ()> {
        match self {
            Self::Stdio { service, .. } => service,
            #[cfg(feature = "transport-http-client")]
            Self::Http { service, .. } => service,
        }
    }

    /// Graceful shutdown adapting to transport type.
    async fn shutdown(self) {
        match self {
            Self::Stdio {
                service, mut child, ..
            } => {
                let _ = service.cancel().await;
                match tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), child.wait())
                    .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(error)) => {
                        tracing::debug!(error = %error, "failed to wait MCP child process");
                    }
                    Err(_) => {
                        let _ = child.kill().await;
                    }
                }
            }
            #[cfg(feature = "transport-http-client")]
            Self::Http { service, .. } => {
                let _ = service.cancel().await;
            }
        }
    }

    /// Spawn a stdio child process and negotiate MCP handshake.
    ///
    /// MCP servers are long-lived with a persistent, open stdin pipe (the
    /// Transport writes one JSON-RPC request at a time for the life of the
    /// process), unlike the one-shot "write a blob and close stdin" model
    /// `pml_process::spawn_tool_sandboxed` is built for. So sandboxing is
    /// applied directly here, reusing the same primitives (`create_scope_command`
    /// for cgroup v2, `apply_rlimits` for the setrlimit fallback) with stdin
    /// left piped and open.
    async fn spawn_stdio(
        config: &McpServerConfig,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let sandbox_config = SandboxConfig {
            memory_max_mb: config.memory_max_mb.unwrap_or(MCP_SANDBOX_MEMORY_MAX_MB),
            memory_swap_max_mb: MCP_SANDBOX_MEMORY_SWAP_MAX_MB,
            pids_max: MCP_SANDBOX_PIDS_MAX,
        };

        let (mut child, sandbox) = match detect_sandbox_capability() {
            SandboxCapability::CgroupV2 => {
                let mut cmd = create_scope_command(&config.name, MCP_SANDBOX_SESSION_ID, &sandbox_config);
                cmd.arg(command).args(args);
                for (key, value) in env {
                    cmd.env(key, value);
                }
                let child = spawn_piped_interactive(Command::from(cmd))
                    .with_context(|| format!("failed to sandbox MCP server '{}'", config.name))?;
                let guard = CgroupScopeGuard::new(&config.name, MCP_SANDBOX_SESSION_ID);
                (child, ChildSandbox::Cgroup(guard))
            }
            SandboxCapability::Setrlimit => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                for (key, value) in env {
                    cmd.env(key, value);
                }
                let child = spawn_with_rlimit_interactive(cmd, &sandbox_config)
                    .with_context(|| format!("failed to sandbox MCP server '{}'", config.name))?;
                let watcher = child.id().and_then(|pid| {
                    RssWatcher::start(pid, sandbox_config.memory_max_mb, Duration::from_secs(5)).ok()
                });
                (child, ChildSandbox::Rlimit { watcher })
            }
            SandboxCapability::None => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                for (key, value) in env {
                    cmd.env(key, value);
                }
                let child = spawn_piped_interactive(cmd)
                    .with_context(|| format!("failed to spawn MCP server '{}'", config.name))?;
                (child, ChildSandbox::None)
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture stdout for MCP server '{}'", config.name))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture stdin for MCP server '{}'", config.name))?;
        if let Some(mut stderr) = child.stderr.take() {
            let server_name = config.name.clone();
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader};
                let mut lines = BufReader::new(&mut stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(server = %server_name, "[server={server_name}] {line}");
                }
            });
        }

        let service = ()
            .serve((stdout, stdin))
            .await
            .with_context(|| format!("failed to spawn MCP server '{}'", config.name))?;

        Ok(Self::Stdio {
            service,
            child: Box::new(child),
            _sandbox: sandbox,
        })
    }

    /// Connect to a remote MCP server via Streamable HTTP.
    ///
    /// Performs URL safety validation before establishing the connection:
    /// - Scheme whitelist: only `http` and `https` are allowed
    /// - HTTPS enforcement: `http://` is rejected unless `allow_insecure` is set
    /// - SSRF protection: loopback, RFC1918, link-local, and cloud metadata IPs are blocked
    #[cfg(feature = "transport-http-client")]
    async fn connect_http(
        config: &McpServerConfig,
        url: &str,
        allow_insecure: bool,
    ) -> Result<Self> {
        use rmcp::transport::StreamableHttpClientTransport;

        validate_http_url(url, allow_insecure, &config.name)?;
        preflight_ssrf_check(url, &config.name)?;

        tracing::info!(server = %config.name, url = %url, "connecting to HTTP MCP server");

        let transport = StreamableHttpClientTransport::from_uri(url);

        let service: RunningService<RoleClient, ()> = ().serve(transport).await.with_context(|| {
            format!(
                "failed to connect to HTTP MCP server '{}' at {url}",
                config.name
            )
        })?;

        Ok(Self::Http { service })
    }
}

/// Sandbox resources that must outlive the child's stdio handles, mirroring
/// `pml_process::SandboxHandle` for the interactive (open-stdin) spawn path.
enum ChildSandbox {
    Cgroup(#[allow(dead_code)] CgroupScopeGuard),
    Rlimit {
        #[allow(dead_code)]
        watcher: Option<RssWatcher>,
    },
    None,
}

/// Pipe stdout/stderr/stdin and isolate the child in its own process group,
/// without applying rlimits (used for the cgroup and no-sandbox paths, where
/// resource limits are either enforced by the scope or not enforced at all).
fn spawn_piped_interactive(mut cmd: Command) -> Result<tokio::process::Child> {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    cmd.spawn().context("failed to spawn MCP server child")
}

fn spawn_with_rlimit_interactive(
    mut cmd: Command,
    config: &SandboxConfig,
) -> Result<tokio::process::Child> {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let memory_max_mb = config.memory_max_mb;
    let pids_max = config.pids_max.map(u64::from);
    // SAFETY: setsid() and setrlimit are async-signal-safe and run before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(move || {
            libc::setsid();
            apply_rlimits(memory_max_mb, pids_max).map_err(io::Error::other)
        });
    }

    cmd.spawn()
        .context("failed to spawn interactive rlimit child")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pml_config::McpTransport;
    use std::fs;

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

    fn mock_server_config(name: &str, script: &std::path::Path) -> McpServerConfig {
        McpServerConfig {
            name: name.to_string(),
            transport: McpTransport::Stdio {
                command: "sh".to_string(),
                args: vec![script.to_string_lossy().into_owned()],
                env: HashMap::new(),
            },
            stateful: false,
            memory_max_mb: None,
        }
    }

    #[tokio::test]
    async fn list_and_call_tool_round_trip() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let script = write_script(temp.path())?;
        let registry = McpRegistry::new(vec![mock_server_config("mock", &script)]);

        let tools = registry
            .list_tools("mock", CancellationToken::new())
            .await?;
        assert_eq!(tools[0].name.as_ref(), "echo_tool");

        let result = registry
            .call_tool(
                "mock",
                CallToolRequestParams::new("echo_tool"),
                CancellationToken::new(),
            )
            .await?;
        assert_eq!(
            result.content[0].as_text().map(|t| t.text.as_str()),
            Some("pong")
        );

        registry.shutdown_all().await?;
        Ok(())
    }

    #[tokio::test]
    async fn unknown_server_errors() {
        let registry = McpRegistry::new(Vec::new());
        let err = registry
            .list_tools("ghost", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown MCP server"));
    }

    #[tokio::test]
    async fn upsert_and_remove_change_server_names() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let script = write_script(temp.path())?;
        let registry = McpRegistry::new(Vec::new());
        assert!(registry.server_names().await.is_empty());

        registry.upsert(mock_server_config("mock", &script)).await;
        assert_eq!(registry.server_names().await, vec!["mock".to_string()]);

        registry.remove("mock").await?;
        assert!(registry.server_names().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn key_requirements_reflect_server_env_placeholders() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let script = write_script(temp.path())?;
        let mut config = mock_server_config("mock", &script);
        if let McpTransport::Stdio { env, .. } = &mut config.transport {
            env.insert("KEY".to_string(), "${TAVILY_API_KEY}".to_string());
        }
        let registry = McpRegistry::new(vec![config]);

        let requirements = registry.key_requirements().await;
        assert_eq!(requirements.len(), 1);
        assert_eq!(requirements[0].env_var_name, "TAVILY_API_KEY");
        assert_eq!(requirements[0].required_by_tool, "mock");

        registry.remove("mock").await?;
        assert!(registry.key_requirements().await.is_empty());
        Ok(())
    }
}
