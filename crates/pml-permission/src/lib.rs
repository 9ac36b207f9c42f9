//! Permission Engine (spec §4.12): pattern-based allow/deny/ask for tool ids.
//!
//! Checked in order deny → allow → ask, first match wins; fallthrough is
//! `Ask`. Deliberately does not merge with any built-in default set: a
//! config with no `[permissions]` section means every tool falls through to
//! `Ask` (`pml_config::global::PermissionsConfig::default()` is empty in all
//! three lists), which is a deliberate safety bias, not an oversight.

use pml_config::global::PermissionsConfig;

/// Outcome of checking a tool id against the permission configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Deny,
    Allow,
    Ask,
}

/// Evaluates tool ids against an ordered set of deny/allow/ask patterns.
pub struct PermissionEngine<'a> {
    config: &'a PermissionsConfig,
}

impl<'a> PermissionEngine<'a> {
    pub fn new(config: &'a PermissionsConfig) -> Self {
        Self { config }
    }

    /// Decide deny/allow/ask for `tool_id` (a `ns:action` short form or an
    /// FQDN's `namespace:action` pair).
    pub fn check(&self, tool_id: &str) -> Decision {
        if self.config.deny.iter().any(|p| matches_pattern(p, tool_id)) {
            return Decision::Deny;
        }
        if self.config.allow.iter().any(|p| matches_pattern(p, tool_id)) {
            return Decision::Allow;
        }
        if self.config.ask.iter().any(|p| matches_pattern(p, tool_id)) {
            return Decision::Ask;
        }
        Decision::Ask
    }
}

/// Match one permission pattern against a `namespace:action` tool id.
///
/// Patterns (spec §4.12):
/// - `*` matches everything.
/// - `ns:*` matches any action in namespace `ns`.
/// - `ns` (no colon) is sugar for `ns:*`.
/// - `ns:action` matches exactly.
fn matches_pattern(pattern: &str, tool_id: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let Some((tool_ns, _tool_action)) = tool_id.split_once(':') else {
        return pattern == tool_id;
    };

    match pattern.split_once(':') {
        Some((pattern_ns, "*")) => pattern_ns == tool_ns,
        Some((pattern_ns, pattern_action)) => pattern_ns == tool_ns && pattern_action == _tool_action,
        None => pattern == tool_ns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(deny: &[&str], allow: &[&str], ask: &[&str]) -> PermissionsConfig {
        PermissionsConfig {
            deny: deny.iter().map(|s| s.to_string()).collect(),
            allow: allow.iter().map(|s| s.to_string()).collect(),
            ask: ask.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn wildcard_matches_everything() {
        let cfg = config(&[], &["*"], &[]);
        let engine = PermissionEngine::new(&cfg);
        assert_eq!(engine.check("fs:read_file"), Decision::Allow);
        assert_eq!(engine.check("net:fetch"), Decision::Allow);
    }

    #[test]
    fn namespace_wildcard_matches_any_action_in_namespace() {
        let cfg = config(&[], &["fs:*"], &[]);
        let engine = PermissionEngine::new(&cfg);
        assert_eq!(engine.check("fs:read_file"), Decision::Allow);
        assert_eq!(engine.check("fs:write_file"), Decision::Allow);
        assert_eq!(engine.check("net:fetch"), Decision::Ask);
    }

    #[test]
    fn bare_namespace_is_sugar_for_wildcard() {
        let cfg = config(&[], &["fs"], &[]);
        let engine = PermissionEngine::new(&cfg);
        assert_eq!(engine.check("fs:read_file"), Decision::Allow);
    }

    #[test]
    fn exact_match_only_matches_that_action() {
        let cfg = config(&[], &["fs:read_file"], &[]);
        let engine = PermissionEngine::new(&cfg);
        assert_eq!(engine.check("fs:read_file"), Decision::Allow);
        assert_eq!(engine.check("fs:write_file"), Decision::Ask);
    }

    #[test]
    fn deny_wins_over_allow() {
        let cfg = config(&["fs:write_file"], &["fs:*"], &[]);
        let engine = PermissionEngine::new(&cfg);
        assert_eq!(engine.check("fs:write_file"), Decision::Deny);
        assert_eq!(engine.check("fs:read_file"), Decision::Allow);
    }

    #[test]
    fn empty_config_defaults_to_ask_for_everything() {
        let cfg = PermissionsConfig::default();
        let engine = PermissionEngine::new(&cfg);
        assert_eq!(engine.check("fs:read_file"), Decision::Ask);
        assert_eq!(engine.check("anything:at_all"), Decision::Ask);
    }

    #[test]
    fn explicit_ask_pattern_is_reported_as_ask() {
        let cfg = config(&[], &[], &["fs:*"]);
        let engine = PermissionEngine::new(&cfg);
        assert_eq!(engine.check("fs:delete_file"), Decision::Ask);
    }

    #[test]
    fn unknown_tool_with_no_matching_pattern_falls_through_to_ask() {
        let cfg = config(&["other:*"], &["fs:*"], &[]);
        let engine = PermissionEngine::new(&cfg);
        assert_eq!(engine.check("net:fetch"), Decision::Ask);
    }
}
