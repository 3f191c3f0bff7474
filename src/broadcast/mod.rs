//! Fan-out of admitted codes to target channels.

pub mod broadcaster;
pub mod resolver;

use serde::Serialize;

use crate::cache::snapshot::ChannelId;

pub use broadcaster::{Broadcaster, DispatchPlan, PlannedSend, outbound_text, plan};
pub use resolver::resolve_link;

/// Result of one send to one target channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub target_id: ChannelId,
    pub success: bool,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn ok(target_id: ChannelId) -> Self {
        Self {
            target_id,
            success: true,
            error: None,
        }
    }

    pub fn failed(target_id: ChannelId, error: impl Into<String>) -> Self {
        Self {
            target_id,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Aggregated results of broadcasting one code.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastReport {
    pub code: String,
    /// One entry per dispatched target, in plan order.
    pub results: Vec<DeliveryResult>,
    /// Eligible targets left out by their channel filter.
    pub skipped: usize,
}

impl BroadcastReport {
    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.delivered()
    }

    /// Every dispatched send succeeded.
    pub fn is_full(&self) -> bool {
        self.failed() == 0
    }
}
