//! Fan-out broadcaster.
//!
//! `plan()` is pure over a snapshot: it decides who receives the code and
//! with which link. `Broadcaster::broadcast()` dispatches the plan as one
//! task per target, bounded by a semaphore, and collects one result per
//! target. A failed or panicking send never cancels its siblings, and
//! nothing is retried.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::resolver::resolve_link;
use super::{BroadcastReport, DeliveryResult};
use crate::audit::{AuditEvent, AuditSink, record_all};
use crate::cache::snapshot::{ChannelId, ConfigSnapshot, FilterMode, TargetChannel};
use crate::channels::Delivery;
use crate::pipeline::types::ParsedCode;

/// One resolved send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSend {
    pub target: TargetChannel,
    pub link: String,
    pub text: String,
}

/// Who receives a code.
#[derive(Debug, Clone, Default)]
pub struct DispatchPlan {
    pub sends: Vec<PlannedSend>,
    /// Eligible targets whose channel filter did not match.
    pub skipped: usize,
}

/// Text sent to every target.
pub fn outbound_text(code: &str, link: &str) -> String {
    format!("`{code}`\n\n{link}")
}

/// Resolve the targets and texts for `parsed`.
///
/// Targets are visited in load order. Paused targets and targets of
/// ineligible owners are dropped first; a channel listed by several owners
/// is then handled once, under the first remaining owner's settings.
pub fn plan(snapshot: &ConfigSnapshot, parsed: &ParsedCode) -> DispatchPlan {
    let code_lower = parsed.code.to_lowercase();
    let link_lower = parsed.link.to_lowercase();

    let mut seen = HashSet::new();
    let mut out = DispatchPlan::default();

    for target in &snapshot.targets {
        if target.paused || !snapshot.owner_can_broadcast(target.owner_id) {
            continue;
        }
        if !seen.insert(target.channel_id) {
            continue;
        }

        if target.filter_mode == FilterMode::Filtered {
            let terms = snapshot.channel_filter(target.channel_id);
            let matched = terms
                .iter()
                .any(|t| code_lower.contains(t.as_str()) || link_lower.contains(t.as_str()));
            if !matched {
                debug!(
                    channel_id = target.channel_id,
                    code = %parsed.code,
                    "Channel filter did not match"
                );
                out.skipped += 1;
                continue;
            }
        }

        let link = resolve_link(snapshot, target, &parsed.code, &parsed.link);
        out.sends.push(PlannedSend {
            target: target.clone(),
            link: link.to_string(),
            text: outbound_text(&parsed.code, link),
        });
    }

    out
}

/// Dispatches admitted codes to their targets.
pub struct Broadcaster {
    delivery: Arc<dyn Delivery>,
    audit: Option<Arc<dyn AuditSink>>,
    audit_tasks: Mutex<JoinSet<()>>,
    limit: Arc<Semaphore>,
}

impl Broadcaster {
    pub fn new(delivery: Arc<dyn Delivery>, max_concurrent: usize) -> Self {
        Self {
            delivery,
            audit: None,
            audit_tasks: Mutex::new(JoinSet::new()),
            limit: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Send `parsed` to every planned target.
    ///
    /// Each send runs as its own task, so a send that panics is reported as
    /// a failure for its target only. Returns `None` when no target would
    /// receive the code.
    pub async fn broadcast(
        &self,
        snapshot: &ConfigSnapshot,
        parsed: &ParsedCode,
    ) -> Option<BroadcastReport> {
        let DispatchPlan { sends, skipped } = plan(snapshot, parsed);
        if sends.is_empty() {
            warn!(code = %parsed.code, skipped, "No eligible targets for code");
            return None;
        }

        let results = self.dispatch_all(&sends).await;

        for r in results.iter().filter(|r| !r.success) {
            warn!(
                code = %parsed.code,
                channel_id = r.target_id,
                error = r.error.as_deref().unwrap_or("unknown"),
                "Delivery failed"
            );
        }

        let report = BroadcastReport {
            code: parsed.code.clone(),
            results,
            skipped,
        };
        info!(
            code = %report.code,
            delivered = report.delivered(),
            failed = report.failed(),
            skipped,
            "Broadcast complete"
        );

        if let Some(audit) = &self.audit {
            let events = audit_events(&sends, &report);
            let audit = Arc::clone(audit);
            let mut pending = self.audit_tasks.lock().await;
            reap(&mut pending);
            pending.spawn(async move { record_all(audit.as_ref(), events).await });
        }

        Some(report)
    }

    /// Wait for every audit task spawned so far.
    pub async fn drain_audit(&self) {
        let mut pending = self.audit_tasks.lock().await;
        while let Some(done) = pending.join_next().await {
            if let Err(e) = done {
                warn!(error = %e, "Audit task failed");
            }
        }
    }

    /// Run one task per send and collect the results in plan order.
    async fn dispatch_all(&self, sends: &[PlannedSend]) -> Vec<DeliveryResult> {
        let mut tasks = JoinSet::new();
        let mut slots = HashMap::with_capacity(sends.len());

        for (idx, send) in sends.iter().enumerate() {
            let handle = tasks.spawn(dispatch(
                Arc::clone(&self.delivery),
                Arc::clone(&self.limit),
                send.target.channel_id,
                send.text.clone(),
            ));
            slots.insert(handle.id(), idx);
        }

        let mut results: Vec<Option<DeliveryResult>> = sends.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    if let Some(&idx) = slots.get(&id) {
                        results[idx] = Some(result);
                    }
                }
                Err(e) => {
                    if let Some(&idx) = slots.get(&e.id()) {
                        let target_id = sends[idx].target.channel_id;
                        error!(channel_id = target_id, error = %e, "Delivery task panicked");
                        results[idx] = Some(DeliveryResult::failed(
                            target_id,
                            "delivery task panicked",
                        ));
                    }
                }
            }
        }

        results
            .into_iter()
            .zip(sends)
            .map(|(result, send)| {
                result.unwrap_or_else(|| {
                    DeliveryResult::failed(send.target.channel_id, "delivery task lost")
                })
            })
            .collect()
    }
}

async fn dispatch(
    delivery: Arc<dyn Delivery>,
    limit: Arc<Semaphore>,
    target_id: ChannelId,
    text: String,
) -> DeliveryResult {
    // The semaphore is never closed; an error here means it was.
    let Ok(_permit) = limit.acquire_owned().await else {
        return DeliveryResult::failed(target_id, "dispatch limiter closed");
    };

    match delivery.send(target_id, &text).await {
        Ok(()) => DeliveryResult::ok(target_id),
        Err(e) => DeliveryResult::failed(target_id, e.to_string()),
    }
}

/// Drop finished audit tasks so the set does not grow.
fn reap(pending: &mut JoinSet<()>) {
    while let Some(done) = pending.try_join_next() {
        if let Err(e) = done {
            warn!(error = %e, "Audit task failed");
        }
    }
}

fn audit_events(sends: &[PlannedSend], report: &BroadcastReport) -> Vec<AuditEvent> {
    let at = Utc::now();
    sends
        .iter()
        .zip(&report.results)
        .map(|(send, result)| {
            if result.success {
                AuditEvent::Delivered {
                    channel_id: send.target.channel_id,
                    owner_id: send.target.owner_id,
                    code: report.code.clone(),
                    at,
                }
            } else {
                AuditEvent::DeliveryFailed {
                    channel_id: send.target.channel_id,
                    owner_id: send.target.owner_id,
                    code: report.code.clone(),
                    error: result.error.clone().unwrap_or_default(),
                    at,
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::snapshot::{LinkOverride, Owner};
    use crate::error::ChannelError;
    use crate::pipeline::types::GrammarTag;
    use crate::store::traits::ConfigRows;

    /// Records every send; fails for the listed channels.
    #[derive(Default)]
    struct RecordingDelivery {
        fail: HashSet<ChannelId>,
        sent: Mutex<Vec<(ChannelId, String)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Option<Duration>,
        panic_on: Option<ChannelId>,
    }

    impl RecordingDelivery {
        fn failing(ids: &[ChannelId]) -> Self {
            Self {
                fail: ids.iter().copied().collect(),
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<(ChannelId, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Delivery for RecordingDelivery {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, target_id: ChannelId, text: &str) -> Result<(), ChannelError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic_on == Some(target_id) {
                tokio::task::yield_now().await;
                panic!("delivery client bug for {target_id}");
            }
            if self.fail.contains(&target_id) {
                return Err(ChannelError::SendFailed {
                    name: "recording".into(),
                    reason: "chat not found".into(),
                });
            }
            self.sent.lock().unwrap().push((target_id, text.to_string()));
            Ok(())
        }
    }

    fn parsed(code: &str, link: &str) -> ParsedCode {
        ParsedCode {
            code: code.into(),
            link: link.into(),
            grammar: GrammarTag::Bare,
        }
    }

    fn snapshot(rows: ConfigRows) -> ConfigSnapshot {
        ConfigSnapshot::from_rows(rows)
    }

    fn owners(ids: &[i64]) -> Vec<Owner> {
        ids.iter().map(|id| Owner::enabled(*id)).collect()
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_siblings() {
        let snap = snapshot(ConfigRows {
            owners: owners(&[1]),
            targets: (1..=5).map(|i| TargetChannel::new(-i, 1)).collect(),
            ..ConfigRows::default()
        });
        let delivery = Arc::new(RecordingDelivery::failing(&[-3]));
        let broadcaster = Broadcaster::new(delivery.clone(), 20);

        let report = broadcaster
            .broadcast(&snap, &parsed("PROMO123", "https://x.com/y"))
            .await
            .unwrap();

        assert_eq!(report.results.len(), 5);
        assert_eq!(report.delivered(), 4);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_full());
        let failed = report.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.target_id, -3);
        assert!(failed.error.as_deref().unwrap().contains("chat not found"));
        assert_eq!(delivery.sent().len(), 4);
    }

    #[tokio::test]
    async fn panicking_send_is_a_failure_for_that_target_only() {
        let snap = snapshot(ConfigRows {
            owners: owners(&[1]),
            targets: (1..=5).map(|i| TargetChannel::new(-i, 1)).collect(),
            ..ConfigRows::default()
        });
        let delivery = Arc::new(RecordingDelivery {
            delay: Some(Duration::from_millis(10)),
            panic_on: Some(-3),
            ..RecordingDelivery::default()
        });

        let report = Broadcaster::new(delivery.clone(), 20)
            .broadcast(&snap, &parsed("PROMO123", "https://x.com/y"))
            .await
            .unwrap();

        let ids: Vec<_> = report.results.iter().map(|r| r.target_id).collect();
        assert_eq!(ids, vec![-1, -2, -3, -4, -5]);
        assert_eq!(report.delivered(), 4);
        assert!(!report.results[2].success);
        assert!(report.results[2].error.as_deref().unwrap().contains("panicked"));

        let mut sent: Vec<_> = delivery.sent().into_iter().map(|(id, _)| id).collect();
        sent.sort_unstable();
        assert_eq!(sent, vec![-5, -4, -2, -1]);
    }

    #[tokio::test]
    async fn outbound_text_is_code_then_link() {
        let snap = snapshot(ConfigRows {
            owners: owners(&[1]),
            targets: vec![TargetChannel::new(-100, 1)],
            ..ConfigRows::default()
        });
        let delivery = Arc::new(RecordingDelivery::default());
        Broadcaster::new(delivery.clone(), 4)
            .broadcast(&snap, &parsed("PROMO123", "https://x.com/y"))
            .await
            .unwrap();

        assert_eq!(
            delivery.sent(),
            vec![(-100, "`PROMO123`\n\nhttps://x.com/y".to_string())]
        );
    }

    #[test]
    fn filtered_target_needs_a_matching_keyword() {
        let snap = snapshot(ConfigRows {
            owners: owners(&[1]),
            targets: vec![
                TargetChannel::new(-100, 1).with_filter_mode(FilterMode::Filtered),
                TargetChannel::new(-200, 1).with_filter_mode(FilterMode::Filtered),
            ],
            channel_filters: vec![(-100, "Promo".into())],
            ..ConfigRows::default()
        });

        let hit = plan(&snap, &parsed("PROMO123", "https://x.com"));
        assert_eq!(hit.sends.len(), 1);
        assert_eq!(hit.sends[0].target.channel_id, -100);
        // -200 has no filter terms at all.
        assert_eq!(hit.skipped, 1);

        let via_link = plan(&snap, &parsed("XYZ", "https://promo.example"));
        assert_eq!(via_link.sends.len(), 1);

        let miss = plan(&snap, &parsed("OTHER1", "https://x.com"));
        assert!(miss.sends.is_empty());
        assert_eq!(miss.skipped, 2);
    }

    #[test]
    fn shared_channel_uses_first_eligible_owner() {
        let snap = snapshot(ConfigRows {
            owners: vec![
                Owner {
                    owner_id: 1,
                    active: true,
                    banned: true,
                    bot_enabled: true,
                },
                Owner::enabled(2),
                Owner::enabled(3),
            ],
            targets: vec![
                TargetChannel::new(-100, 1),
                TargetChannel::new(-100, 2),
                TargetChannel::new(-100, 3),
            ],
            overrides: vec![
                LinkOverride::new(1, -100, "promo", "https://owner1.example"),
                LinkOverride::new(2, -100, "promo", "https://owner2.example"),
                LinkOverride::new(3, -100, "promo", "https://owner3.example"),
            ],
            ..ConfigRows::default()
        });

        let plan = plan(&snap, &parsed("PROMO1", "https://x.com"));
        assert_eq!(plan.sends.len(), 1);
        assert_eq!(plan.sends[0].target.owner_id, 2);
        assert_eq!(plan.sends[0].link, "https://owner2.example");
    }

    #[test]
    fn paused_targets_and_unknown_owners_are_dropped() {
        let snap = snapshot(ConfigRows {
            owners: owners(&[1]),
            targets: vec![
                TargetChannel::new(-100, 1).paused(),
                TargetChannel::new(-200, 9),
                TargetChannel::new(-300, 1),
            ],
            ..ConfigRows::default()
        });

        let plan = plan(&snap, &parsed("PROMO1", "https://x.com"));
        let ids: Vec<_> = plan.sends.iter().map(|s| s.target.channel_id).collect();
        assert_eq!(ids, vec![-300]);
    }

    #[tokio::test]
    async fn no_targets_yields_none() {
        let snap = snapshot(ConfigRows::default());
        let broadcaster = Broadcaster::new(Arc::new(RecordingDelivery::default()), 4);
        assert!(
            broadcaster
                .broadcast(&snap, &parsed("PROMO1", "https://x.com"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let snap = snapshot(ConfigRows {
            owners: owners(&[1]),
            targets: (1..=12).map(|i| TargetChannel::new(-i, 1)).collect(),
            ..ConfigRows::default()
        });
        let delivery = Arc::new(RecordingDelivery {
            delay: Some(Duration::from_millis(20)),
            ..RecordingDelivery::default()
        });

        let report = Broadcaster::new(delivery.clone(), 3)
            .broadcast(&snap, &parsed("PROMO1", "https://x.com"))
            .await
            .unwrap();

        assert_eq!(report.delivered(), 12);
        assert!(delivery.peak.load(Ordering::SeqCst) <= 3);
        assert!(delivery.peak.load(Ordering::SeqCst) >= 2);
    }
}
