use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully-qualified tool identifier: `scope.project.namespace.action[.contentHash]`.
///
/// The 4-part form denotes "current version"; the 5-part form pins an
/// integrity hash. Shorthand `namespace:action` is accepted at input
/// boundaries and resolved to an FQDN before use internally.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fqdn {
    scope: String,
    project: String,
    namespace: String,
    action: String,
    content_hash: Option<String>,
}

impl Fqdn {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    /// Drop the content hash, if any, yielding the "current version" form.
    pub fn without_hash(&self) -> Fqdn {
        Fqdn {
            content_hash: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for Fqdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.scope, self.project, self.namespace, self.action)?;
        if let Some(hash) = &self.content_hash {
            write!(f, ".{hash}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Fqdn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [scope, project, namespace, action] => Ok(Fqdn {
                scope: scope.to_string(),
                project: project.to_string(),
                namespace: namespace.to_string(),
                action: action.to_string(),
                content_hash: None,
            }),
            [scope, project, namespace, action, hash] => Ok(Fqdn {
                scope: scope.to_string(),
                project: project.to_string(),
                namespace: namespace.to_string(),
                action: action.to_string(),
                content_hash: Some(hash.to_string()),
            }),
            _ => Err(format!(
                "invalid FQDN '{s}': expected scope.project.namespace.action[.contentHash]"
            )),
        }
    }
}

impl TryFrom<String> for Fqdn {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Fqdn> for String {
    fn from(fqdn: Fqdn) -> String {
        fqdn.to_string()
    }
}

/// A previously discovered `namespace:action` shorthand resolved to its FQDN.
#[derive(Clone, Debug)]
pub struct ShorthandResolution {
    pub shorthand: String,
    pub resolved: Fqdn,
}

/// One tool call executed inside a sandbox, appended to the execution
/// context's `toolCallRecords` in call order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_fqdn: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
}

/// A UI resource surfaced by a tool call during an execution, kept in the
/// order it was collected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectedUiResource {
    pub source: String,
    pub resource_uri: String,
    pub context: serde_json::Value,
    pub slot: usize,
}

/// Sync unit sent to the cloud trace sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trace {
    pub capability_id: String,
    pub trace_id: String,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub task_results: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Records that a tool requires an environment variable the gateway doesn't
/// currently have set, surfaced by the Key Gate as a HIL pause.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequirementRecord {
    pub env_var_name: String,
    pub required_by_tool: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_fqdn_parses_four_part() {
        let fqdn = Fqdn::from_str("acme.billing.invoices.create").unwrap();
        assert_eq!(fqdn.scope(), "acme");
        assert_eq!(fqdn.project(), "billing");
        assert_eq!(fqdn.namespace(), "invoices");
        assert_eq!(fqdn.action(), "create");
        assert_eq!(fqdn.content_hash(), None);
    }

    #[test]
    fn test_fqdn_parses_five_part_with_hash() {
        let fqdn = Fqdn::from_str("acme.billing.invoices.create.ab12cd34").unwrap();
        assert_eq!(fqdn.content_hash(), Some("ab12cd34"));
    }

    #[test]
    fn test_fqdn_display_roundtrip() {
        let s = "acme.billing.invoices.create";
        let fqdn = Fqdn::from_str(s).unwrap();
        assert_eq!(fqdn.to_string(), s);
    }

    #[test]
    fn test_fqdn_without_hash_strips_pin() {
        let fqdn = Fqdn::from_str("acme.billing.invoices.create.ab12cd34").unwrap();
        assert_eq!(fqdn.without_hash().to_string(), "acme.billing.invoices.create");
    }

    #[test]
    fn test_fqdn_rejects_wrong_part_count() {
        assert!(Fqdn::from_str("too.few.parts").is_err());
        assert!(Fqdn::from_str("way.too.many.parts.here.indeed").is_err());
    }

    #[test]
    fn test_fqdn_json_roundtrip() {
        let fqdn = Fqdn::from_str("acme.billing.invoices.create").unwrap();
        let json = serde_json::to_string(&fqdn).unwrap();
        assert_eq!(json, "\"acme.billing.invoices.create\"");
        let back: Fqdn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fqdn);
    }
}
