//! Relay — the single entry point every producer feeds.
//!
//! Flow per message:
//! 1. Source allowlist
//! 2. Parse (keyword grammar, then bare grammar)
//! 3. Banned-term filter
//! 4. Dedup admission (fails closed on store errors)
//! 5. Fan-out broadcast
//!
//! Steps 1-3 are pure over the current snapshot. Duplicate observations
//! from redundant producers are absorbed at step 4.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::cache::ConfigCache;
use crate::dedup::DedupGate;
use crate::pipeline::filter::{self, FilterVerdict};
use crate::pipeline::parser;
use crate::pipeline::types::{Outcome, SourceMessage};

/// Admission and dispatch of observed source messages.
pub struct Relay {
    cache: Arc<ConfigCache>,
    gate: Arc<dyn DedupGate>,
    broadcaster: Broadcaster,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Counts one `on_message` call as in flight until dropped.
struct InFlight<'a>(&'a Relay);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Relay {
    pub fn new(
        cache: Arc<ConfigCache>,
        gate: Arc<dyn DedupGate>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            cache,
            gate,
            broadcaster,
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Run one message through the pipeline.
    pub async fn on_message(&self, msg: SourceMessage) -> Outcome {
        // Register before checking the flag so shutdown() cannot miss us.
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let _guard = InFlight(self);
        if !self.accepting.load(Ordering::Acquire) {
            return Outcome::ShuttingDown;
        }

        let outcome = self.process(msg).await;
        debug!(outcome = outcome.label(), "Message processed");
        outcome
    }

    async fn process(&self, msg: SourceMessage) -> Outcome {
        let snapshot = self.cache.get_snapshot().await;

        if !snapshot.is_source(msg.source_id) {
            debug!(source_id = msg.source_id, "Ignoring message from unmonitored channel");
            return Outcome::RejectedSource;
        }

        let Some(parsed) = parser::parse(&msg.text, &snapshot.keywords) else {
            debug!(source_id = msg.source_id, "No code in message");
            return Outcome::RejectedFormat;
        };

        if let FilterVerdict::Reject { term } =
            filter::check(&parsed.code, &parsed.link, &snapshot.banned_words)
        {
            info!(code = %parsed.code, term = %term, "Code rejected by banned term");
            return Outcome::RejectedBanned {
                code: parsed.code,
                term,
            };
        }

        match self.gate.admit(&parsed.code).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(code = %parsed.code, "Duplicate code");
                return Outcome::RejectedDuplicate { code: parsed.code };
            }
            Err(e) => {
                error!(code = %parsed.code, gate = self.gate.name(), error = %e, "Dedup admission failed");
                return Outcome::AdmissionFailed {
                    code: parsed.code,
                    reason: e.to_string(),
                };
            }
        }

        info!(
            code = %parsed.code,
            grammar = %parsed.grammar,
            source_id = msg.source_id,
            version = snapshot.version,
            "Code admitted"
        );

        match self.broadcaster.broadcast(&snapshot, &parsed).await {
            Some(report) => Outcome::Delivered(report),
            None => Outcome::DroppedNoTargets { code: parsed.code },
        }
    }

    /// Whether new messages are still admitted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Messages currently inside `on_message`.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Stop admitting and wait up to `grace` for in-flight messages and
    /// their audit records.
    ///
    /// Returns `true` if everything drained in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.accepting.store(false, Ordering::Release);
        info!(in_flight = self.in_flight(), "Relay shutting down");

        let drained = tokio::time::timeout(grace, async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    break;
                }
                notified.await;
            }
            self.broadcaster.drain_audit().await;
        })
        .await
        .is_ok();

        if drained {
            info!("Relay drained");
        } else {
            warn!(
                in_flight = self.in_flight(),
                grace_secs = grace.as_secs(),
                "Shutdown grace elapsed with messages in flight"
            );
        }
        drained
    }
}
