//! Landlock filesystem confinement.
//!
//! Applied inside the sandbox runner process right before it hands control
//! to the embedded script engine, so a script that somehow reached a file
//! path still can't read or write anything outside the directories it was
//! explicitly given. This is in addition to, not instead of, the engine's
//! own lack of registered I/O functions â€” defense in depth for "zero ambient
//! authority".

use std::path::PathBuf;

/// Result of attempting to apply a Landlock ruleset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandlockOutcome {
    /// The ruleset was fully enforced by the running kernel.
    Enforced,
    /// The kernel only partially supports the requested ABI; some requested
    /// access rights may not be confined.
    PartiallyEnforced,
    /// The kernel has no Landlock support at all. The caller must fall back
    /// to process-level isolation only.
    Unsupported,
}

/// A single directory the sandboxed process is allowed to touch, and how.
#[derive(Debug, Clone)]
pub struct AllowedPath {
    pub path: PathBuf,
    pub writable: bool,
}

impl AllowedPath {
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writable: false,
        }
    }

    pub fn read_write(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writable: true,
        }
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use super::{AllowedPath, LandlockOutcome};
    use landlock::{
        ABI, Access, AccessFs, PathBeneath, PathFd, PathFdError, RestrictionStatus, Ruleset,
        RulesetAttr, RulesetCreatedAttr, RulesetError, RulesetStatus,
    };

    #[derive(Debug, thiserror::Error)]
    pub enum LandlockError {
        #[error("landlock ruleset error: {0}")]
        Ruleset(#[from] RulesetError),
        #[error("cannot open sandbox path: {0}")]
        PathFd(#[from] PathFdError),
    }

    /// Restrict the calling thread to only the filesystem access described by
    /// `allowed`. Must be called after the last fork/exec-adjacent setup and
    /// before any untrusted code runs, since restriction is irreversible and
    /// inherited by children.
    pub fn apply_landlock(allowed: &[AllowedPath]) -> Result<LandlockOutcome, LandlockError> {
        let abi = ABI::V2;
        let ruleset = Ruleset::default()
            .handle_access(AccessFs::from_all(abi))?
            .create()?;

        let mut ruleset = ruleset;
        for entry in allowed {
            let access = if entry.writable {
                AccessFs::from_all(abi)
            } else {
                AccessFs::from_read(abi)
            };
            let rule = PathBeneath::new(PathFd::new(&entry.path)?, access);
            ruleset = ruleset.add_rule(rule)?;
        }

        let status: RestrictionStatus = ruleset.restrict_self()?;
        Ok(match status.ruleset {
            RulesetStatus::FullyEnforced => LandlockOutcome::Enforced,
            RulesetStatus::PartiallyEnforced => LandlockOutcome::PartiallyEnforced,
            RulesetStatus::NotEnforced => LandlockOutcome::Unsupported,
        })
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::{AllowedPath, LandlockOutcome};

    #[derive(Debug, thiserror::Error)]
    pub enum LandlockError {}

    pub fn apply_landlock(_allowed: &[AllowedPath]) -> Result<LandlockOutcome, LandlockError> {
        Ok(LandlockOutcome::Unsupported)
    }
}

pub use imp::{LandlockError, apply_landlock};

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_restrict_to_tempdir_allows_reads_inside() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("allowed.txt");
        std::fs::write(&file_path, b"hello").unwrap();

        let allowed = vec![AllowedPath::read_only(dir.path())];
        let outcome = std::thread::spawn(move || apply_landlock(&allowed))
            .join()
            .unwrap();
        assert!(outcome.is_ok());

        // Reading the allow-listed path must still work from this thread's
        // perspective post-restriction (restriction applies to the spawned
        // thread only, not this test process).
        assert_eq!(std::fs::read(&file_path).unwrap(), b"hello");
    }

    #[test]
    fn test_empty_allowlist_still_restricts() {
        let outcome = std::thread::spawn(|| apply_landlock(&[]))
            .join()
            .unwrap();
        assert!(outcome.is_ok());
    }
}
