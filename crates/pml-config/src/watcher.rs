//! Config Watcher (spec §4.11): detects server-set changes in the declarative
//! config file and triggers re-discovery.
//!
//! On every filesystem modification event the file is reloaded and the
//! `mcpServers` subtree is hashed in canonical (key-sorted) form. If the hash
//! differs from the last known one, added/removed server names are computed
//! and handed to a caller-supplied callback. The callback's errors are logged,
//! never allowed to kill the watcher (spec: "Errors in the callback are
//! logged but do not stop the watcher").

use crate::global::GatewayConfig;
use crate::mcp::McpServerConfig;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

/// Added/removed server names computed from one config reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Canonical (key-sorted, name-sorted) hash of a server list, stable across
/// permutation (spec I8: `configHash(servers) == configHash(permutation(servers))`).
pub fn canonical_hash(servers: &[McpServerConfig]) -> String {
    let mut sorted: Vec<&McpServerConfig> = servers.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let values: Vec<serde_json::Value> = sorted
        .iter()
        .map(|s| canonicalize(&serde_json::to_value(s).expect("server config is serializable")))
        .collect();

    let canonical_json =
        serde_json::to_string(&values).expect("canonicalized value is serializable");
    let mut hasher = Sha256::new();
    hasher.update(canonical_json.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

struct WatchState {
    hash: String,
    names: HashSet<String>,
}

/// Watches one config file and invokes a callback whenever the set of
/// configured MCP server names changes.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    state: Arc<Mutex<WatchState>>,
}

impl ConfigWatcher {
    /// Start watching `config_path`. `on_change` is invoked synchronously
    /// (from the watcher's background thread) whenever the server set
    /// changes; it should be cheap and non-blocking (e.g. send onto a
    /// channel), since a slow callback delays processing of further events.
    pub fn spawn<F>(config_path: PathBuf, on_change: F) -> notify::Result<Self>
    where
        F: Fn(ConfigChange) + Send + Sync + 'static,
    {
        let initial = Self::load_state(&config_path).unwrap_or(WatchState {
            hash: String::new(),
            names: HashSet::new(),
        });
        let state = Arc::new(Mutex::new(initial));
        let state_for_watcher = Arc::clone(&state);
        let watched_path = config_path.clone();

        let (tx, rx) = std_mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;

        let watch_target = watched_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| watched_path.clone());
        watcher.watch(&watch_target, RecursiveMode::NonRecursive)?;

        std::thread::spawn(move || {
            for event in rx {
                let Ok(event) = event else { continue };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }
                if !event.paths.iter().any(|p| p == &watched_path) {
                    continue;
                }
                Self::handle_event(&watched_path, &state_for_watcher, &on_change);
            }
        });

        Ok(Self {
            _watcher: watcher,
            state,
        })
    }

    fn load_state(config_path: &Path) -> Option<WatchState> {
        let config = GatewayConfig::load_from_path(config_path).ok()?;
        Some(WatchState {
            hash: canonical_hash(&config.mcp_servers),
            names: config.server_names().into_iter().map(str::to_string).collect(),
        })
    }

    fn handle_event<F>(config_path: &Path, state: &Arc<Mutex<WatchState>>, on_change: &F)
    where
        F: Fn(ConfigChange),
    {
        let config = match GatewayConfig::load_from_path(config_path) {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(error = %err, "config watcher: failed to reload config, keeping previous state");
                return;
            }
        };

        let new_hash = canonical_hash(&config.mcp_servers);
        let new_names: HashSet<String> =
            config.server_names().into_iter().map(str::to_string).collect();

        let mut guard = state.lock().expect("config watcher mutex poisoned");
        if guard.hash == new_hash {
            return;
        }

        let added: Vec<String> = new_names.difference(&guard.names).cloned().collect();
        let removed: Vec<String> = guard.names.difference(&new_names).cloned().collect();
        guard.hash = new_hash;
        guard.names = new_names;
        drop(guard);

        if !added.is_empty() || !removed.is_empty() {
            on_change(ConfigChange { added, removed });
        }
    }

    /// Last known canonical hash, for tests/inspection.
    pub fn current_hash(&self) -> String {
        self.state.lock().expect("mutex poisoned").hash.clone()
    }
}
