//! The `serve` entry point (spec §6): starts the gateway's inbound MCP
//! surface over child-process stdio and, when a port is configured, over
//! Streamable HTTP as well.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use pml_config::{ConfigWatcher, GatewayConfig};
use rmcp::ServiceExt;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::{StreamableHttpServerConfig, StreamableHttpService, stdio};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::gateway::GatewayHandle;
use crate::proxy::{ExecuteHandler, ProxyRouter};
use crate::registry::McpRegistry;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Flags accepted by the `serve` CLI subcommand.
#[derive(Debug, Clone)]
pub struct ServeArgs {
    pub config: PathBuf,
    pub port: Option<u16>,
    /// Skip eagerly warming the tool-route cache at startup; the first
    /// `tools/list` call discovers lazily instead.
    pub no_speculative: bool,
}

/// Exit-code-carrying error, matching spec §6: `1` config error, `2`
/// transport/startup failure.
pub enum ServeError {
    Config(anyhow::Error),
    Startup(anyhow::Error),
}

impl ServeError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Startup(_) => 2,
        }
    }
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config error: {e:#}"),
            Self::Startup(e) => write!(f, "startup error: {e:#}"),
        }
    }
}

/// Run the gateway until shutdown (Ctrl-C or a transport closing).
///
/// `make_execute_handler` builds the `pml:execute` handler (the Execution
/// Orchestrator, which lives outside this crate) once the registry exists,
/// so it can route calls back through the [`GatewayHandle`] it's handed.
/// Pass `None` to serve without `pml:execute` (plain tool-proxy mode).
pub async fn run_serve<F>(args: ServeArgs, make_execute_handler: F) -> Result<(), ServeError>
where
    F: FnOnce(Arc<GatewayHandle>, &GatewayConfig) -> Option<Arc<dyn ExecuteHandler>>,
{
    let config = GatewayConfig::load_from_path(&args.config).map_err(ServeError::Config)?;

    let registry = Arc::new(McpRegistry::new(config.mcp_servers.clone()));
    let gateway_handle = Arc::new(GatewayHandle::with_cloud_url(registry.clone(), config.cloud_url.clone()).await);
    let mut router = ProxyRouter::new(registry.clone(), DEFAULT_REQUEST_TIMEOUT);
    if let Some(execute_handler) = make_execute_handler(gateway_handle, &config) {
        router = router.with_execute_handler(execute_handler);
    }

    if !args.no_speculative {
        tracing::info!("warming tool-route cache before accepting requests");
        for server in registry.server_names().await {
            if let Err(error) = registry
                .list_tools(&server, CancellationToken::new())
                .await
            {
                tracing::warn!(server = %server, error = %error, "speculative discovery failed");
            }
        }
    }

    let _config_watcher = spawn_config_watcher(args.config.clone(), registry.clone());

    let port = args.port.or(config.port);
    let cancellation = CancellationToken::new();

    let stdio_task = {
        let router = router.clone();
        tokio::spawn(async move {
            let service = router
                .serve(stdio())
                .await
                .context("failed to start stdio transport")?;
            service.waiting().await.context("stdio transport failed")?;
            Ok::<(), anyhow::Error>(())
        })
    };

    let http_task = match port {
        Some(port) => {
            let app = build_http_router(router.clone(), cancellation.clone());
            let listener = TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("failed to bind HTTP transport on port {port}"))
                .map_err(ServeError::Startup)?;
            tracing::info!(port, "HTTP MCP transport listening");
            let shutdown = cancellation.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
                    .context("HTTP transport failed")
            }))
        }
        None => None,
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        result = stdio_task => {
            if let Err(error) = result.map_err(|e| anyhow::anyhow!(e)).and_then(|r| r) {
                cancellation.cancel();
                let _ = registry.shutdown_all().await;
                return Err(ServeError::Startup(error));
            }
        }
    }

    cancellation.cancel();
    if let Some(http_task) = http_task {
        let _ = http_task.await;
    }
    let _ = registry.shutdown_all().await;
    Ok(())
}

/// Wire the Config Watcher (spec §4.11) into the running registry: the
/// watcher's callback runs on its own background thread and must stay cheap,
/// so it only forwards the diff onto a channel; the actual upsert/remove
/// (which needs `.await`) happens in a dedicated tokio task.
fn spawn_config_watcher(config_path: PathBuf, registry: Arc<McpRegistry>) -> Option<ConfigWatcher> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let watcher = match ConfigWatcher::spawn(config_path.clone(), move |change| {
        let _ = tx.send(change);
    }) {
        Ok(watcher) => watcher,
        Err(error) => {
            tracing::warn!(error = %error, "config watcher unavailable, hot-reload disabled");
            return None;
        }
    };

    tokio::spawn(async move {
        while let Some(change) = rx.recv().await {
            let config = match GatewayConfig::load_from_path(&config_path) {
                Ok(config) => config,
                Err(error) => {
                    tracing::warn!(error = %error, "config watcher: reload failed, skipping change");
                    continue;
                }
            };

            for name in &change.added {
                if let Some(server_config) = config.mcp_servers.iter().find(|s| &s.name == name) {
                    tracing::info!(server = %name, "config watcher: starting added server");
                    registry.upsert(server_config.clone()).await;
                }
            }
            for name in &change.removed {
                tracing::info!(server = %name, "config watcher: stopping removed server");
                if let Err(error) = registry.remove(name).await {
                    tracing::warn!(server = %name, error = %error, "config watcher: failed to remove server");
                }
            }
        }
    });

    Some(watcher)
}

fn build_http_router(router: ProxyRouter, cancellation: CancellationToken) -> Router {
    let service = StreamableHttpService::new(
        move || Ok(router.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig {
            cancellation_token: cancellation,
            ..Default::default()
        },
    );
    Router::new().route_service("/mcp", service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn config_watcher_upserts_added_servers_and_removes_dropped_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
version = 1
workspace = "."
"#,
        )
        .unwrap();

        let registry = Arc::new(McpRegistry::new(Vec::new()));
        let _watcher = spawn_config_watcher(path.clone(), registry.clone());
        assert!(registry.server_names().await.is_empty());

        std::fs::write(
            &path,
            r#"
version = 1
workspace = "."

[[mcp_servers]]
name = "a"
type = "stdio"
command = "echo"
"#,
        )
        .unwrap();

        wait_until(Duration::from_secs(5), || async {
            registry.server_names().await == vec!["a".to_string()]
        })
        .await;

        std::fs::write(
            &path,
            r#"
version = 1
workspace = "."
"#,
        )
        .unwrap();

        wait_until(Duration::from_secs(5), || async {
            registry.server_names().await.is_empty()
        })
        .await;
    }

    async fn wait_until<F, Fut>(timeout: Duration, mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition().await {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("condition not met within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
