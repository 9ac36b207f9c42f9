//! Execution Orchestrator (spec §4.9): the thing behind `pml:execute`.
//!
//! Wires a fresh [`SandboxBridge`] for every call, routes its `mcp.*` RPCs
//! through the Permission Engine and the Router (`GatewayHandle`), and
//! assembles the `ToolCallRecord`/`CollectedUiResource` trail the Trace
//! Sanitiser later consumes. Implements [`ExecuteHandler`] so it can be
//! injected into `pml-mcp`'s `pml:execute` tool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pml_bridge::{RpcHandler, SandboxBridge};
use pml_core::{CollectedUiResource, KeyRequirementRecord, ToolCallRecord};
use pml_mcp::{ExecuteHandler, GatewayHandle, check_keys, pause_for_missing_keys, reload_env};
use pml_permission::{Decision, PermissionEngine};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

/// Default global execution deadline (spec §4.9: "default 5 min").
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Default per-`mcp.*` call deadline (spec §5: "default 30 s").
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// `options` accepted by `execute(code, options)` (spec §4.9).
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub context: Value,
    pub workflow_id: Option<String>,
    pub fqdn_map: HashMap<String, String>,
}

/// `{success, value, durationMs, toolsCalled, toolCallRecords, traceId, collectedUi?}`
/// on success, or the failure envelope otherwise.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success {
        value: Value,
        duration_ms: u64,
        tools_called: usize,
        tool_call_records: Vec<ToolCallRecord>,
        trace_id: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        collected_ui: Vec<CollectedUiResource>,
    },
    Failure {
        code: &'static str,
        message: String,
        trace_id: String,
        tool_call_records: Vec<ToolCallRecord>,
    },
}

/// Drives one `execute` call end to end (spec §4.9 algorithm).
pub struct ExecutionOrchestrator {
    gateway: Option<Arc<GatewayHandle>>,
    permissions: pml_config::global::PermissionsConfig,
    workspace: std::path::PathBuf,
    runner_path: std::path::PathBuf,
    execution_timeout: Duration,
    rpc_timeout: Duration,
}

impl ExecutionOrchestrator {
    pub fn new(
        gateway: Option<Arc<GatewayHandle>>,
        permissions: pml_config::global::PermissionsConfig,
        workspace: std::path::PathBuf,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            gateway,
            permissions,
            workspace,
            runner_path: pml_bridge::default_runner_path()?,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        })
    }

    pub fn with_timeouts(mut self, execution_timeout: Duration, rpc_timeout: Duration) -> Self {
        self.execution_timeout = execution_timeout;
        self.rpc_timeout = rpc_timeout;
        self
    }

    /// Requirements the Key Gate (spec §4.6) checks before this execution is
    /// allowed to reach the sandbox: the static `${VAR}` mapping declared by
    /// every configured MCP server, or none if no gateway is wired.
    async fn key_requirements(&self) -> Vec<KeyRequirementRecord> {
        match &self.gateway {
            Some(gateway) => gateway.key_requirements().await,
            None => Vec::new(),
        }
    }

    /// Steps 2-5 of spec §4.9 (step 1, the Key Gate check, runs in
    /// [`ExecuteHandler::execute`] before this is reached).
    pub async fn execute(&self, code: String, options: ExecutionOptions) -> ExecutionResult {
        let trace_id = options
            .workflow_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

        let accumulator = Arc::new(CallAccumulator::new());
        let handler: Arc<dyn RpcHandler> = Arc::new(OrchestratorRpcHandler {
            gateway: self.gateway.clone(),
            permissions: self.permissions.clone(),
            fqdn_map: options.fqdn_map.clone(),
            rpc_timeout: self.rpc_timeout,
            accumulator: accumulator.clone(),
        });

        let started = Instant::now();
        let execution_id = trace_id.clone();

        let mut bridge = match SandboxBridge::spawn(
            &self.runner_path,
            execution_id,
            code,
            options.context,
            handler,
        )
        .await
        {
            Ok(bridge) => bridge,
            Err(error) => {
                return ExecutionResult::Failure {
                    code: "CODE_ERROR",
                    message: error.to_string(),
                    trace_id,
                    tool_call_records: accumulator.take_records(),
                };
            }
        };

        let outcome = bridge.execute(self.execution_timeout).await;
        bridge.terminate().await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let tool_call_records = accumulator.take_records();

        match outcome {
            Ok(value) => ExecutionResult::Success {
                value,
                duration_ms,
                tools_called: tool_call_records.len(),
                trace_id,
                collected_ui: accumulator.take_ui(),
                tool_call_records,
            },
            Err(error) => ExecutionResult::Failure {
                code: error.code(),
                message: error.to_string(),
                trace_id,
                tool_call_records,
            },
        }
    }
}

#[async_trait]
impl ExecuteHandler for ExecutionOrchestrator {
    /// Step 1 of spec §4.9: the Key Gate check, which may short-circuit the
    /// whole call to an HIL pause envelope (spec §6) before the sandbox ever
    /// spawns. On resume (a `workflowId` is present) the workspace `.env` is
    /// reloaded first, so keys the user just added are picked up before
    /// `checkKeys` runs again (spec §4.6).
    async fn execute(&self, arguments: Option<serde_json::Map<String, Value>>) -> Result<Value, String> {
        let arguments = arguments.unwrap_or_default();
        let code = arguments
            .get("code")
            .and_then(Value::as_str)
            .ok_or("pml:execute requires a \"code\" string argument")?
            .to_string();
        let context = arguments.get("context").cloned().unwrap_or(Value::Null);
        let workflow_id = arguments
            .get("workflowId")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(workflow_id) = &workflow_id
            && let Err(error) = reload_env(&self.workspace)
        {
            tracing::warn!(
                workflow_id = %workflow_id,
                error = %error,
                "key gate: failed to reload workspace .env on resume"
            );
        }

        let requirements = self.key_requirements().await;
        let check = check_keys(&requirements);
        if !check.all_present() {
            let workflow_id = workflow_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
            let pause = pause_for_missing_keys(workflow_id, &check.missing);
            return serde_json::to_value(pause).map_err(|e| e.to_string());
        }

        let result = self
            .execute(
                code,
                ExecutionOptions {
                    context,
                    workflow_id,
                    fqdn_map: HashMap::new(),
                },
            )
            .await;

        serde_json::to_value(result).map_err(|e| e.to_string())
    }
}

/// Accumulates [`ToolCallRecord`]s and [`CollectedUiResource`]s across the
/// concurrent `mcp.*` calls one execution may issue (spec §5: "the sandbox
/// may interleave multiple pending `mcp.*` calls").
struct CallAccumulator {
    records: Mutex<Vec<ToolCallRecord>>,
    ui: Mutex<Vec<CollectedUiResource>>,
    next_slot: AtomicUsize,
}

impl CallAccumulator {
    fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            ui: Mutex::new(Vec::new()),
            next_slot: AtomicUsize::new(0),
        }
    }

    async fn record(&self, record: ToolCallRecord) {
        self.records.lock().await.push(record);
    }

    async fn collect_ui(&self, source: String, resource_uri: String, context: Value) {
        let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);
        self.ui.lock().await.push(CollectedUiResource {
            source,
            resource_uri,
            context,
            slot,
        });
    }

    fn take_records(&self) -> Vec<ToolCallRecord> {
        self.records.try_lock().map(|mut g| std::mem::take(&mut *g)).unwrap_or_default()
    }

    fn take_ui(&self) -> Vec<CollectedUiResource> {
        self.ui.try_lock().map(|mut g| std::mem::take(&mut *g)).unwrap_or_default()
    }
}

struct OrchestratorRpcHandler {
    gateway: Option<Arc<GatewayHandle>>,
    permissions: pml_config::global::PermissionsConfig,
    fqdn_map: HashMap<String, String>,
    rpc_timeout: Duration,
    accumulator: Arc<CallAccumulator>,
}

#[async_trait]
impl RpcHandler for OrchestratorRpcHandler {
    async fn handle(&self, method: &str, args: Value) -> Result<Value, String> {
        let started = Instant::now();
        let tool_fqdn = self.fqdn_map.get(method).cloned().unwrap_or_else(|| method.to_string());

        let engine = PermissionEngine::new(&self.permissions);
        if engine.check(method) == Decision::Deny {
            let record = ToolCallRecord {
                tool_fqdn,
                args,
                result: Value::Null,
                success: false,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            self.accumulator.record(record).await;
            return Err(format!("PERMISSION_DENIED: '{method}' is denied by permission policy"));
        }

        let Some(gateway) = &self.gateway else {
            let record = ToolCallRecord {
                tool_fqdn,
                args,
                result: Value::Null,
                success: false,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            self.accumulator.record(record).await;
            return Err("NO_CLIENT_HANDLER: no gateway handle wired for client-routed calls".to_string());
        };

        let result = gateway.call(method, args.clone(), self.rpc_timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                if let Some(resource_uri) = value
                    .get("_meta")
                    .and_then(|m| m.get("ui"))
                    .and_then(|ui| ui.get("resourceUri"))
                    .and_then(Value::as_str)
                {
                    self.accumulator
                        .collect_ui(tool_fqdn.clone(), resource_uri.to_string(), args.clone())
                        .await;
                }
                self.accumulator
                    .record(ToolCallRecord {
                        tool_fqdn,
                        args,
                        result: value.clone(),
                        success: true,
                        duration_ms,
                    })
                    .await;
                Ok(value)
            }
            Err(error) => {
                self.accumulator
                    .record(ToolCallRecord {
                        tool_fqdn,
                        args,
                        result: Value::Null,
                        success: false,
                        duration_ms,
                    })
                    .await;
                Err(error.to_string())
            }
        }
    }
}
