//! Trace Syncer (spec §4.10): batches sanitised traces and POSTs them to the
//! cloud trace sink, honouring 429/Retry-After and a bounded retry budget.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pml_core::{GatewayError, Trace};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::warn;

use crate::sanitize::sanitize;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_BUDGET: u32 = 3;
const FALLBACK_BACKOFF: Duration = Duration::from_secs(5);

struct QueuedTrace {
    trace: Trace,
    retries: u32,
}

/// Single-owner queue; `enqueue` is the only thing called from other tasks
/// and must never block (spec §5: "external producers only call enqueue").
pub struct Syncer {
    cloud_url: Option<String>,
    api_key: String,
    client: reqwest::Client,
    queue: Mutex<VecDeque<QueuedTrace>>,
    batch_size: usize,
    retry_budget: u32,
}

impl Syncer {
    pub fn new(cloud_url: Option<String>, api_key: String) -> Self {
        Self {
            cloud_url,
            api_key,
            client: reqwest::Client::new(),
            queue: Mutex::new(VecDeque::new()),
            batch_size: DEFAULT_BATCH_SIZE,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// Non-blocking enqueue. In standalone mode (`cloud_url` unset) this is
    /// log-only and never touches the network (spec §4.10).
    pub fn enqueue(&self, trace: Trace) {
        if self.cloud_url.is_none() {
            tracing::info!(trace_id = %trace.trace_id, "standalone mode: trace logged, not synced");
            return;
        }
        let mut queue = self.queue.lock().expect("syncer queue mutex poisoned");
        queue.push_back(QueuedTrace { trace, retries: 0 });
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().expect("syncer queue mutex poisoned").len()
    }

    /// Splice up to `batch_size` items off the head and POST them. Failures
    /// are reinserted at the head with an incremented retry counter; items
    /// that exhaust the retry budget are dropped with a warning.
    pub async fn flush(&self) -> Result<usize, GatewayError> {
        let Some(cloud_url) = &self.cloud_url else {
            return Ok(0);
        };

        let batch: Vec<QueuedTrace> = {
            let mut queue = self.queue.lock().expect("syncer queue mutex poisoned");
            let n = self.batch_size.min(queue.len());
            queue.drain(..n).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let sanitized: Vec<serde_json::Value> = batch
            .iter()
            .map(|q| sanitize(&serde_json::to_value(&q.trace).unwrap_or(serde_json::Value::Null)))
            .collect();
        let sent = sanitized.len();

        let response = self
            .client
            .post(format!("{cloud_url}/api/traces"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({"traces": sanitized}))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(sent),
            Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(resp.headers()).unwrap_or(FALLBACK_BACKOFF);
                self.requeue(batch);
                Err(GatewayError::SyncRateLimited {
                    retry_after_secs: Some(retry_after.as_secs()),
                })
            }
            Ok(resp) => {
                let status = resp.status();
                self.requeue(batch);
                Err(GatewayError::CloudError(format!("trace sync returned HTTP {status}")))
            }
            Err(error) => {
                self.requeue(batch);
                Err(GatewayError::CloudError(error.to_string()))
            }
        }
    }

    fn requeue(&self, batch: Vec<QueuedTrace>) {
        let mut queue = self.queue.lock().expect("syncer queue mutex poisoned");
        for mut item in batch.into_iter().rev() {
            item.retries += 1;
            if item.retries > self.retry_budget {
                warn!(trace_id = %item.trace.trace_id, retries = item.retries, "trace dropped after exhausting retry budget");
                continue;
            }
            queue.push_front(item);
        }
    }

    /// Stop periodic flushing, attempt one final flush, clear retry state.
    /// Idempotent: calling twice on an empty queue is a no-op both times.
    pub async fn shutdown(&self) {
        if let Err(error) = self.flush().await {
            warn!(error = %error, "final trace flush on shutdown failed");
        }
        self.queue.lock().expect("syncer queue mutex poisoned").clear();
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let seconds = (retry_at - Utc::now()).num_seconds().max(0) as u64;
    Some(Duration::from_secs(seconds))
}
