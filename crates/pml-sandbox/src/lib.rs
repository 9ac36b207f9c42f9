//! Sandbox Runtime (spec §4.7): executes untrusted glue code with zero
//! ambient authority. The *only* channel out is a structured message port —
//! here, NDJSON frames over the runner subprocess's stdio (spec §4.1's
//! Worker transport, re-purposed across a process boundary rather than an
//! in-host message port, per the Design Note in spec §9: "use a child
//! process run with restricted capabilities").
//!
//! This crate is split into:
//! - the wire protocol (`frame`), shared with `pml-bridge` on the host side;
//! - the engine (`engine`), which runs *inside* the sandboxed subprocess —
//!   an embedded `rhai` VM with zero registered I/O functions, plus one
//!   synthetic `mcp_call` host function that proxies `mcp.<ns>.<action>(args)`
//!   calls out through whatever `McpCall` the caller supplies.
//! - `bin/pml_sandbox_runner.rs`, the actual subprocess entry point, applies
//!   `landlock` confinement before handing control to the engine.

pub mod engine;
pub mod frame;

pub use engine::{McpCall, SandboxError, execute};
pub use frame::SandboxFrame;

/// Name of the runner binary, resolved by `pml-bridge` as a sibling of the
/// host's own executable (both land in the same Cargo target directory).
pub const RUNNER_BIN_NAME: &str = "pml-sandbox-runner";
