//! Configuration cache — versioned, atomically swapped snapshot.
//!
//! Readers clone an `Arc<ConfigSnapshot>` out of the lock and keep using it
//! for as long as they like; a refresh builds a complete new snapshot and
//! replaces the `Arc` in one write. Nobody ever observes a half-updated view.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::snapshot::ConfigSnapshot;
use crate::config::CacheConfig;
use crate::error::DatabaseError;
use crate::store::traits::ConfigSource;

/// Tries for the first load when the config moves mid-read.
const INITIAL_LOAD_ATTEMPTS: u32 = 5;

const INITIAL_LOAD_RETRY_DELAY: Duration = Duration::from_millis(50);

/// What a single refresh check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Version unchanged and snapshot still fresh.
    Unchanged,
    /// The version counter moved; a new snapshot was swapped in.
    Reloaded { from: i64, to: i64 },
    /// No version change seen for longer than the fallback TTL; reloaded anyway.
    Forced { version: i64 },
    /// The store could not be read; the previous snapshot stays in service.
    Failed,
}

/// Hot-path configuration cache.
pub struct ConfigCache {
    source: Arc<dyn ConfigSource>,
    settings: CacheConfig,
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigCache {
    /// Perform the first load. The cache cannot exist without a snapshot.
    ///
    /// A read that raced a config write is retried a few times; any other
    /// error is returned at once.
    pub async fn load(
        source: Arc<dyn ConfigSource>,
        settings: CacheConfig,
    ) -> Result<Arc<Self>, DatabaseError> {
        let mut attempt = 1;
        let rows = loop {
            match source.load_config().await {
                Ok(rows) => break rows,
                Err(e @ DatabaseError::ConcurrentChange { .. })
                    if attempt < INITIAL_LOAD_ATTEMPTS =>
                {
                    warn!(error = %e, attempt, "Config changed during initial load; retrying");
                    attempt += 1;
                    tokio::time::sleep(INITIAL_LOAD_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        };
        let snapshot = ConfigSnapshot::from_rows(rows);
        info!(
            version = snapshot.version,
            targets = snapshot.targets.len(),
            sources = snapshot.source_count(),
            "Configuration snapshot loaded"
        );

        Ok(Arc::new(Self {
            source,
            settings,
            current: RwLock::new(Arc::new(snapshot)),
        }))
    }

    /// The current snapshot. Never touches the backing store.
    pub async fn get_snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&*self.current.read().await)
    }

    pub fn settings(&self) -> &CacheConfig {
        &self.settings
    }

    /// Run one version check, reloading when the counter moved or the
    /// snapshot outlived the fallback TTL.
    pub async fn refresh_once(&self) -> RefreshOutcome {
        let current = self.get_snapshot().await;
        let age = Utc::now()
            .signed_duration_since(current.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let stale = age >= self.settings.fallback_ttl;

        let version = match self.source.config_version().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, version = current.version, "Config version check failed; keeping last snapshot");
                return RefreshOutcome::Failed;
            }
        };

        if version == current.version && !stale {
            return RefreshOutcome::Unchanged;
        }

        let snapshot = match self.source.load_config().await {
            Ok(rows) => ConfigSnapshot::from_rows(rows),
            Err(e) => {
                warn!(error = %e, version = current.version, "Config reload failed; keeping last snapshot");
                return RefreshOutcome::Failed;
            }
        };

        if snapshot.version < current.version {
            warn!(
                loaded = snapshot.version,
                current = current.version,
                "Ignoring config snapshot older than the one in service"
            );
            return RefreshOutcome::Failed;
        }

        let to = snapshot.version;
        let targets = snapshot.targets.len();
        *self.current.write().await = Arc::new(snapshot);

        if to != current.version {
            info!(from = current.version, to, targets, "Configuration snapshot swapped");
            RefreshOutcome::Reloaded {
                from: current.version,
                to,
            }
        } else {
            debug!(version = to, age_secs = age.as_secs(), "Configuration snapshot refreshed by fallback TTL");
            RefreshOutcome::Forced { version: to }
        }
    }
}

/// Spawn the background version poller.
pub fn spawn_refresh_task(cache: Arc<ConfigCache>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cache.settings.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip immediate first tick; the snapshot was just loaded.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            cache.refresh_once().await;
        }
    })
}
