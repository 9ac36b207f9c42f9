//! Key Gate (spec §4.6): detects missing/placeholder API keys required by a
//! tool call before it reaches the sandbox, and drives the human-in-the-loop
//! pause/resume cycle around them.

use std::path::Path;

use pml_core::KeyRequirementRecord;

/// Exact (case-insensitive) placeholder markers from the spec §4.6 pattern
/// set: `{"xxx"+, "your-key*", "<...>", "TODO", "CHANGE_ME", "placeholder",
/// "test-key", "fake-key", "example", "insert-here", "replace-me"}`. The
/// first three are patterns, handled separately in [`is_valid`]; the rest are
/// exact markers listed here, plus a couple of common literal variants.
const PLACEHOLDER_EXACT: &[&str] = &[
    "todo",
    "change_me",
    "changeme",
    "placeholder",
    "test-key",
    "fake-key",
    "example",
    "insert-here",
    "replace-me",
    "your_api_key_here",
    "your-api-key-here",
];

/// True when `value` looks like a real, usable credential rather than a
/// template placeholder or empty string.
pub fn is_valid(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return false;
    }
    if PLACEHOLDER_EXACT.contains(&normalized.as_str()) {
        return false;
    }
    // Pattern markers: "xxx"+ (any run containing "xxx"), "your-key*"
    // (prefix), "<...>" (angle-bracket template placeholder).
    if normalized.contains("xxx") {
        return false;
    }
    if normalized.starts_with("your-key") {
        return false;
    }
    if normalized.starts_with('<') && normalized.ends_with('>') {
        return false;
    }
    true
}

/// Outcome of checking every key a prospective execution will require,
/// collected upfront rather than failing on the first miss (spec §4.6:
/// "checkKeys returns all issues in one pass").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCheckResult {
    pub missing: Vec<KeyRequirementRecord>,
}

impl KeyCheckResult {
    pub fn all_present(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Checks each requirement's named environment variable against the current
/// process environment, reporting every unmet one.
pub fn check_keys(requirements: &[KeyRequirementRecord]) -> KeyCheckResult {
    let mut missing = Vec::new();
    for requirement in requirements {
        let present = std::env::var(&requirement.env_var_name)
            .map(|v| is_valid(&v))
            .unwrap_or(false);
        if !present {
            missing.push(requirement.clone());
        }
    }
    KeyCheckResult { missing }
}

/// A human-in-the-loop pause envelope surfaced to the caller when required
/// keys are missing (spec §4.6: "pauseForMissingKeys"; spec §6:
/// `pml:execute` "Returns either a success envelope ... or the HIL pause
/// envelope").
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HilPause {
    pub approval_required: bool,
    pub approval_type: &'static str,
    pub workflow_id: String,
    pub missing_keys: Vec<String>,
    pub instruction: String,
}

/// Builds the pause envelope for `missing`, naming the env vars the user
/// needs to set before resubmitting `pml:execute` with the same `workflowId`.
pub fn pause_for_missing_keys(workflow_id: String, missing: &[KeyRequirementRecord]) -> HilPause {
    let mut missing_keys: Vec<String> = missing.iter().map(|r| r.env_var_name.clone()).collect();
    missing_keys.sort();
    missing_keys.dedup();

    let instruction = format!(
        "Set the following environment variable{} then resubmit pml:execute with workflowId \"{workflow_id}\": {}",
        if missing_keys.len() == 1 { "" } else { "s" },
        missing_keys.join(", ")
    );

    HilPause {
        approval_required: true,
        approval_type: "api_key_required",
        workflow_id,
        missing_keys,
        instruction,
    }
}

/// Reloads `<workspace>/.env` into the process environment so a resumed
/// execution sees keys the user just added. Idempotent: re-reading the same
/// file twice leaves the environment in the same state (spec I5).
///
/// Lines are `KEY=VALUE`; blank lines and `#`-prefixed comments are skipped.
/// Surrounding single or double quotes around the value are stripped.
pub fn reload_env(workspace: &Path) -> std::io::Result<usize> {
    let path = pml_config::paths::workspace_env_path(workspace);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let mut reloaded = 0;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if key.is_empty() {
            continue;
        }
        // SAFETY: single-threaded at config-load/resume time; no other task
        // reads env concurrently with this reload.
        unsafe {
            std::env::set_var(key, value);
        }
        reloaded += 1;
    }
    Ok(reloaded)
}
