use std::path::PathBuf;

/// XDG app name used for all path resolution.
pub const APP_NAME: &str = "pml-gateway";

fn project_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

fn project_state_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| {
        dirs.state_dir()
            .unwrap_or_else(|| dirs.data_local_dir())
            .to_path_buf()
    })
}

fn effective_uid() -> u32 {
    #[cfg(unix)]
    {
        // SAFETY: `geteuid` has no preconditions and returns caller effective UID.
        unsafe { libc::geteuid() }
    }
    #[cfg(not(unix))]
    {
        0
    }
}

/// Global (user-level) config directory, e.g. `~/.config/pml-gateway/`.
pub fn config_dir() -> Option<PathBuf> {
    project_config_dir()
}

/// Global state directory, used for things like retained trace backlog.
pub fn state_dir() -> Option<PathBuf> {
    project_state_dir()
}

/// Runtime directory, preferring `$XDG_RUNTIME_DIR` and falling back to a
/// per-uid directory under `/tmp`.
pub fn runtime_dir() -> PathBuf {
    let uid = effective_uid();
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(root) => PathBuf::from(root).join(APP_NAME),
        Err(_) => PathBuf::from("/tmp").join(format!("{APP_NAME}-{uid}")),
    }
}

/// Fallback state directory on platforms where `state_dir()` is unavailable.
pub fn state_dir_fallback() -> PathBuf {
    std::env::temp_dir().join(format!("{APP_NAME}-state"))
}

/// Workspace-relative path to the declarative gateway config (§6).
pub fn workspace_config_path(workspace: &std::path::Path) -> PathBuf {
    workspace.join(".pml").join("config.toml")
}

/// Workspace-relative path to the `.env` file consulted by the Key Gate on
/// resume (spec §4.6: "env reload must be workspace-relative").
pub fn workspace_env_path(workspace: &std::path::Path) -> PathBuf {
    workspace.join(".env")
}
