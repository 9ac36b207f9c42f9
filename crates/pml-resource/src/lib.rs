//! Resource isolation primitives for subprocess sandboxing.
//!
//! Covers mechanisms that compose depending on what the host supports:
//! cgroup v2 scopes, POSIX `setrlimit`, and Landlock filesystem
//! confinement. Callers probe [`detect_sandbox_capability`] once and pick
//! the strongest mechanism available.

pub mod cgroup;
pub mod landlock_policy;
pub mod rlimit;
pub mod sandbox;

pub use cgroup::{
    CgroupScopeGuard, OrphanScope, SandboxConfig, cleanup_orphan_scopes, create_scope_command,
};
pub use landlock_policy::{LandlockOutcome, apply_landlock};
pub use rlimit::{RssWatcher, apply_rlimits};
pub use sandbox::{SandboxCapability, detect_sandbox_capability};
