//! Router (spec §4.5): decides whether a tool call is served by a locally
//! configured MCP server or forwarded to the cloud.
//!
//! A tool identifier arrives either as shorthand (`namespace:action`) or as
//! an FQDN (`scope.project.namespace.action[.contentHash]`). Routing looks
//! only at the namespace: if it names a server this gateway has configured,
//! the call is served locally; otherwise it is forwarded.

use std::collections::HashSet;

use pml_core::Fqdn;

/// Where a resolved tool call should be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Serve from a locally configured MCP server, identified by name.
    Client { server_name: String, action: String },
    /// Forward to the cloud tool-execution endpoint.
    Cloud,
}

/// Pure routing-decision logic over the set of locally configured server
/// names (spec §4.5: "resolveToolRouting").
#[derive(Debug, Clone)]
pub struct Router {
    local_servers: HashSet<String>,
}

impl Router {
    pub fn new(local_servers: HashSet<String>) -> Self {
        Self { local_servers }
    }

    /// Resolve a `namespace:action` shorthand or FQDN string to a route.
    pub fn resolve(&self, tool_id: &str) -> RouteTarget {
        if let Some((namespace, action)) = tool_id.split_once(':') {
            return self.resolve_namespace(namespace, action);
        }

        if let Ok(fqdn) = tool_id.parse::<Fqdn>() {
            return self.resolve_namespace(fqdn.namespace(), fqdn.action());
        }

        RouteTarget::Cloud
    }

    fn resolve_namespace(&self, namespace: &str, action: &str) -> RouteTarget {
        if self.local_servers.contains(namespace) {
            RouteTarget::Client {
                server_name: namespace.to_string(),
                action: action.to_string(),
            }
        } else {
            RouteTarget::Cloud
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(HashSet::from(["fs".to_string(), "git".to_string()]))
    }

    #[test]
    fn shorthand_for_local_server_routes_to_client() {
        match router().resolve("fs:read_file") {
            RouteTarget::Client { server_name, action } => {
                assert_eq!(server_name, "fs");
                assert_eq!(action, "read_file");
            }
            RouteTarget::Cloud => panic!("expected client route"),
        }
    }

    #[test]
    fn shorthand_for_unknown_namespace_routes_to_cloud() {
        assert_eq!(router().resolve("billing:create_invoice"), RouteTarget::Cloud);
    }

    #[test]
    fn fqdn_namespace_matching_local_server_routes_to_client() {
        match router().resolve("acme.myproj.fs.read_file") {
            RouteTarget::Client { server_name, action } => {
                assert_eq!(server_name, "fs");
                assert_eq!(action, "read_file");
            }
            RouteTarget::Cloud => panic!("expected client route"),
        }
    }

    #[test]
    fn fqdn_namespace_unmatched_routes_to_cloud() {
        assert_eq!(router().resolve("acme.myproj.billing.create_invoice"), RouteTarget::Cloud);
    }

    #[test]
    fn malformed_identifier_routes_to_cloud() {
        assert_eq!(router().resolve("not-an-fqdn-or-shorthand"), RouteTarget::Cloud);
    }
}
