//! Shared types and error taxonomy used across the gateway crates.

pub mod error;
pub mod types;

pub use error::GatewayError;
pub use types::{CollectedUiResource, Fqdn, KeyRequirementRecord, ShorthandResolution, Trace, ToolCallRecord};
