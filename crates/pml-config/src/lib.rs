//! Gateway configuration loading, merging, and change-watching (.pml/config.toml).

pub mod global;
pub mod mcp;
pub mod paths;
pub mod watcher;

pub use global::GatewayConfig;
pub use mcp::{McpFilter, McpRegistry, McpServerConfig, McpTransport, resolve_env};
pub use paths::APP_NAME;
pub use watcher::{ConfigChange, ConfigWatcher};
