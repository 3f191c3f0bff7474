//! Single-instance dedup: an in-process map behind one async mutex.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{DedupGate, ttl_delta};
use crate::error::DatabaseError;

/// Map size above which expired entries are pruned on insert.
const PRUNE_THRESHOLD: usize = 5000;

/// In-memory dedup gate.
///
/// Every check-then-insert runs under the same mutex, so admission is
/// atomic within this process. It knows nothing about other processes.
pub struct MemoryDedupGate {
    ttl: TimeDelta,
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryDedupGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl_delta(ttl),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Admission as of `now`.
    pub async fn admit_at(&self, code: &str, now: DateTime<Utc>) -> bool {
        let mut seen = self.seen.lock().await;

        if let Some(accepted_at) = seen.get(code)
            && now.signed_duration_since(*accepted_at) < self.ttl
        {
            return false;
        }

        seen.insert(code.to_string(), now);

        if seen.len() > PRUNE_THRESHOLD {
            let before = seen.len();
            let ttl = self.ttl;
            seen.retain(|_, accepted_at| now.signed_duration_since(*accepted_at) < ttl);
            debug!(removed = before - seen.len(), "Pruned in-memory dedup map");
        }

        true
    }

    /// Evict expired entries as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut seen = self.seen.lock().await;
        let before = seen.len();
        let ttl = self.ttl;
        seen.retain(|_, accepted_at| now.signed_duration_since(*accepted_at) < ttl);
        before - seen.len()
    }

    /// Number of tracked codes, expired or not.
    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }
}

#[async_trait]
impl DedupGate for MemoryDedupGate {
    fn name(&self) -> &str {
        "memory"
    }

    async fn admit(&self, code: &str) -> Result<bool, DatabaseError> {
        Ok(self.admit_at(code, Utc::now()).await)
    }

    async fn sweep(&self) -> Result<usize, DatabaseError> {
        Ok(self.sweep_at(Utc::now()).await)
    }
}
