//! The gateway's declarative configuration file (spec §6): `version`,
//! `workspace`, `cloudUrl`, `port`, `mcpServers`, `permissions`.

use crate::mcp::McpServerConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Ordered allow/deny/ask pattern sets (spec §3 "Permission configuration",
/// §4.12 "Permission Engine"). A missing `[permissions]` section in the file
/// deserializes to `Default`, which is empty in every set — the Router and
/// Permission Engine treat that as "ask for everything", never as "allow
/// everything" (spec §4.12: "No merging with defaults").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub ask: Vec<String>,
}

/// The gateway's top-level configuration, loaded from `.pml/config.toml`
/// relative to `workspace`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfig {
    pub version: u32,
    pub workspace: PathBuf,
    #[serde(default)]
    pub cloud_url: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: 1,
            workspace: PathBuf::from("."),
            cloud_url: None,
            port: None,
            mcp_servers: Vec::new(),
            permissions: PermissionsConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load from an explicit path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read gateway config: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse gateway config: {}", path.display()))
    }

    /// Load `<workspace>/.pml/config.toml`. Returns `Ok(None)` when absent.
    pub fn load(workspace: &Path) -> Result<Option<Self>> {
        let path = crate::paths::workspace_config_path(workspace);
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from_path(&path).map(Some)
    }

    /// Server names declared in `mcp_servers`, for config-watcher diffing.
    pub fn server_names(&self) -> HashSet<&str> {
        self.mcp_servers.iter().map(|s| s.name.as_str()).collect()
    }
}
