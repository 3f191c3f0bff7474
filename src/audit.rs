//! Delivery audit trail.
//!
//! The broadcaster hands events to an `AuditSink` on a background task
//! after the sends complete; shutdown waits for those tasks. Sink failures
//! are logged and never change a delivery outcome.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cache::snapshot::{ChannelId, OwnerId};
use crate::error::Error;
use crate::store::traits::StatsStore;

/// One auditable delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    Delivered {
        channel_id: ChannelId,
        owner_id: OwnerId,
        code: String,
        at: DateTime<Utc>,
    },
    DeliveryFailed {
        channel_id: ChannelId,
        owner_id: OwnerId,
        code: String,
        error: String,
        at: DateTime<Utc>,
    },
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), Error>;
}

/// Record a batch of events, logging failures.
pub async fn record_all(sink: &dyn AuditSink, events: Vec<AuditEvent>) {
    for event in events {
        if let Err(e) = sink.record(event).await {
            warn!(error = %e, "Audit record failed");
        }
    }
}

/// Writes per-channel daily statistics for successful deliveries.
pub struct StoreAudit {
    stats: Arc<dyn StatsStore>,
}

impl StoreAudit {
    pub fn new(stats: Arc<dyn StatsStore>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl AuditSink for StoreAudit {
    async fn record(&self, event: AuditEvent) -> Result<(), Error> {
        match event {
            AuditEvent::Delivered {
                channel_id,
                code,
                at,
                ..
            } => {
                self.stats.record_code_stat(channel_id, &code, at).await?;
            }
            AuditEvent::DeliveryFailed {
                channel_id,
                code,
                error,
                ..
            } => {
                debug!(channel_id, code = %code, error = %error, "Failed delivery not counted");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn only_successful_deliveries_are_counted() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let audit = StoreAudit::new(db.clone());
        let at = Utc::now();

        record_all(
            &audit,
            vec![
                AuditEvent::Delivered {
                    channel_id: -100,
                    owner_id: 1,
                    code: "AAA".into(),
                    at,
                },
                AuditEvent::DeliveryFailed {
                    channel_id: -100,
                    owner_id: 1,
                    code: "BBB".into(),
                    error: "blocked".into(),
                    at,
                },
            ],
        )
        .await;

        let stats = db.channel_stats(-100, 10).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].daily_count, 1);
        assert_eq!(stats[0].code_list, "AAA");
    }
}
