//! Deduplication gate — exactly-once admission per code per TTL window.
//!
//! Two strategies share the `DedupGate` contract:
//! - `StoreDedupGate`: atomic conditional upsert in the backing store;
//!   correct across any number of producers and processes
//! - `MemoryDedupGate`: process-local map; only valid with a single producer
//!
//! Eviction (`sweep`) only bounds storage. Admission never depends on it.

pub mod memory;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MIN_SWEEP_INTERVAL;
use crate::error::DatabaseError;

pub use memory::MemoryDedupGate;
pub use store::StoreDedupGate;

/// Admission control keyed by code.
#[async_trait]
pub trait DedupGate: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &str;

    /// `Ok(true)` exactly once per code per rolling window, across all
    /// concurrent callers. An `Err` means admission could not be decided
    /// and the code must not be broadcast.
    async fn admit(&self, code: &str) -> Result<bool, DatabaseError>;

    /// Drop entries whose window has closed. Returns the number removed.
    async fn sweep(&self) -> Result<usize, DatabaseError>;
}

/// Spawn the periodic eviction task. `interval` is raised to the minimum
/// sweep cadence if shorter.
pub fn spawn_sweep_task(gate: Arc<dyn DedupGate>, interval: Duration) -> JoinHandle<()> {
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    tokio::spawn(async move {
        info!(
            gate = gate.name(),
            interval_secs = interval.as_secs(),
            "Dedup sweep started"
        );
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match gate.sweep().await {
                Ok(0) => {}
                Ok(count) => debug!(gate = gate.name(), count, "Swept expired codes"),
                Err(e) => warn!(gate = gate.name(), error = %e, "Dedup sweep failed"),
            }
        }
    })
}

/// Convert a std TTL for timestamp arithmetic, saturating on overflow.
pub(crate) fn ttl_delta(ttl: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(ttl).unwrap_or(chrono::TimeDelta::MAX)
}
