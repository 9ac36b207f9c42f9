use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pml_bridge::{RpcHandler, SandboxBridge};
use serde_json::json;

struct EchoHandler;
#[async_trait::async_trait]
impl RpcHandler for EchoHandler {
    async fn handle(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value, String> {
        Ok(json!({"method": method, "args": args}))
    }
}

struct NeverRespondingHandler;
#[async_trait::async_trait]
impl RpcHandler for NeverRespondingHandler {
    async fn handle(&self, _method: &str, _args: serde_json::Value) -> Result<serde_json::Value, String> {
        std::future::pending().await
    }
}

/// Cargo only sets `CARGO_BIN_EXE_<name>` for bins within the test's own
/// package, and `pml-sandbox-runner` lives in `pml-sandbox`, so fall back on
/// `pml_bridge`'s own sibling-of-current-exe resolution (which also checks
/// the `target/<profile>/deps/` layout test binaries run from).
fn test_runner_path() -> PathBuf {
    let path = pml_bridge::default_runner_path().unwrap();
    assert!(path.exists(), "runner binary not found at {}", path.display());
    path
}

#[tokio::test]
async fn pure_code_returns_without_any_rpc_call() {
    let mut bridge = SandboxBridge::spawn(
        &test_runner_path(),
        "exec-1".to_string(),
        "1 + 41".to_string(),
        json!(null),
        Arc::new(EchoHandler),
    )
    .await
    .unwrap();

    let value = bridge.execute(Duration::from_secs(5)).await.unwrap();
    assert_eq!(value, json!(42));
}

#[tokio::test]
async fn mcp_call_round_trips_through_the_bridge() {
    let mut bridge = SandboxBridge::spawn(
        &test_runner_path(),
        "exec-2".to_string(),
        r#"mcp_call("fs", "read_file", #{path: "a.txt"})"#.to_string(),
        json!(null),
        Arc::new(EchoHandler),
    )
    .await
    .unwrap();

    let value = bridge.execute(Duration::from_secs(5)).await.unwrap();
    assert_eq!(value["method"], json!("fs:read_file"));
}

#[tokio::test]
async fn timeout_kills_the_subprocess_and_reports_execution_timeout() {
    let mut bridge = SandboxBridge::spawn(
        &test_runner_path(),
        "exec-3".to_string(),
        r#"mcp_call("slow", "forever", #{})"#.to_string(),
        json!(null),
        Arc::new(NeverRespondingHandler),
    )
    .await
    .unwrap();

    let err = bridge.execute(Duration::from_millis(200)).await.unwrap_err();
    assert_eq!(err.code(), "EXECUTION_TIMEOUT");
}
