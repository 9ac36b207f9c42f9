//! Trace Sanitiser & Syncer (spec §4.10): redact secrets/PII from execution
//! traces, then batch-ship them to the cloud trace sink with bounded retry.

pub mod sanitize;
pub mod syncer;

pub use sanitize::sanitize;
pub use syncer::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_RETRY_BUDGET, Syncer};
