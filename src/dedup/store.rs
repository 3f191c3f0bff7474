//! Shared-store dedup: admission is the ledger's atomic conditional upsert.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DedupGate;
use crate::error::DatabaseError;
use crate::store::traits::CodeLedger;

/// Dedup gate backed by a `CodeLedger`.
pub struct StoreDedupGate {
    ledger: Arc<dyn CodeLedger>,
    ttl: Duration,
}

impl StoreDedupGate {
    pub fn new(ledger: Arc<dyn CodeLedger>, ttl: Duration) -> Self {
        Self { ledger, ttl }
    }

    /// Admission as of `now`.
    pub async fn admit_at(&self, code: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        self.ledger.try_claim_code(code, now, self.ttl).await
    }
}

#[async_trait]
impl DedupGate for StoreDedupGate {
    fn name(&self) -> &str {
        "store"
    }

    async fn admit(&self, code: &str) -> Result<bool, DatabaseError> {
        self.admit_at(code, Utc::now()).await
    }

    async fn sweep(&self) -> Result<usize, DatabaseError> {
        self.ledger.sweep_codes(Utc::now(), self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::store::LibSqlBackend;

    const HOUR: Duration = Duration::from_secs(3600);

    async fn gate() -> (Arc<LibSqlBackend>, StoreDedupGate) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gate = StoreDedupGate::new(db.clone(), HOUR);
        (db, gate)
    }

    #[tokio::test]
    async fn admits_once_then_again_after_ttl() {
        let (_db, gate) = gate().await;
        let t0 = Utc::now();

        assert!(gate.admit_at("PROMO", t0).await.unwrap());
        assert!(!gate.admit_at("PROMO", t0 + TimeDelta::minutes(30)).await.unwrap());
        assert!(gate.admit_at("PROMO", t0 + TimeDelta::minutes(60)).await.unwrap());
        assert!(!gate.admit_at("PROMO", t0 + TimeDelta::minutes(90)).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_admits_on_one_connection() {
        let (_db, gate) = gate().await;
        let gate = Arc::new(gate);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move { gate.admit("RACE").await.unwrap() }));
        }

        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn concurrent_admits_across_processes() {
        // Two backends on one file stand in for two relay processes.
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relay.db");
        let a = Arc::new(LibSqlBackend::new_local(&path).await.unwrap());
        let b = Arc::new(LibSqlBackend::new_local(&path).await.unwrap());
        let gates = [
            Arc::new(StoreDedupGate::new(a, HOUR)),
            Arc::new(StoreDedupGate::new(b, HOUR)),
        ];

        let mut handles = Vec::new();
        for i in 0..16 {
            let gate = Arc::clone(&gates[i % 2]);
            handles.push(tokio::spawn(async move { gate.admit("SHARED").await.unwrap() }));
        }

        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn sweep_does_not_change_admission() {
        let (db, gate) = gate().await;
        let t0 = Utc::now() - TimeDelta::hours(2);

        assert!(gate.admit_at("OLD", t0).await.unwrap());
        assert!(gate.admit("NEW").await.unwrap());

        assert_eq!(gate.sweep().await.unwrap(), 1);
        assert!(!gate.admit("NEW").await.unwrap());
        assert!(gate.admit("OLD").await.unwrap());
        assert_eq!(db.sweep_codes(Utc::now(), HOUR).await.unwrap(), 0);
    }
}
