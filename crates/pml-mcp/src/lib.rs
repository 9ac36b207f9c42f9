//! MCP gateway core: Transport, Subprocess Supervisor, MCP Client
//! Multiplexer, and Router wired together behind a single `rmcp`
//! `ServerHandler`, plus the `serve` entry point.

mod discovery;
mod gateway;
mod key_gate;
mod proxy;
mod registry;
mod router;
mod serve;

pub use discovery::{DiscoverySummary, SkipReason, SkippedTool};
pub use gateway::GatewayHandle;
pub use key_gate::{HilPause, KeyCheckResult, check_keys, is_valid, pause_for_missing_keys, reload_env};
pub use proxy::{EXECUTE_TOOL_NAME, ExecuteHandler};
pub use router::{RouteTarget, Router};
pub use serve::{ServeArgs, ServeError, run_serve};
