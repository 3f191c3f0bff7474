//! Shared types for the relay pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::BroadcastReport;
use crate::cache::snapshot::ChannelId;

// ── Inbound message ─────────────────────────────────────────────────

/// One observed message from a monitored source.
///
/// Producers build these from their native update format. The same
/// underlying post may arrive from several producers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMessage {
    pub text: String,
    pub source_id: ChannelId,
    pub received_at: DateTime<Utc>,
}

impl SourceMessage {
    pub fn new(source_id: ChannelId, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id,
            received_at: Utc::now(),
        }
    }
}

// ── Parsed code ─────────────────────────────────────────────────────

/// Which grammar recognised the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "grammar", content = "keyword")]
pub enum GrammarTag {
    /// `keyword / code / link`, keyword stored lowercase.
    Keyword(String),
    /// `code / link`.
    Bare,
}

impl fmt::Display for GrammarTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarTag::Keyword(k) => write!(f, "keyword({k})"),
            GrammarTag::Bare => f.write_str("bare"),
        }
    }
}

/// A code and its link extracted from a source message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCode {
    pub code: String,
    pub link: String,
    pub grammar: GrammarTag,
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Terminal state of one `on_message` call.
///
/// Only `AdmissionFailed` reflects an error; the rejections are expected
/// outcomes of normal traffic.
#[derive(Debug)]
pub enum Outcome {
    /// The relay is shutting down and no longer admits codes.
    ShuttingDown,
    /// The message came from a channel that is not a configured source.
    RejectedSource,
    /// Neither grammar matched.
    RejectedFormat,
    /// Code or link contains a banned term.
    RejectedBanned { code: String, term: String },
    /// The code was already admitted inside the current window.
    RejectedDuplicate { code: String },
    /// The dedup store could not be reached. Fails closed: nothing was sent.
    AdmissionFailed { code: String, reason: String },
    /// Admitted, but no target was eligible.
    DroppedNoTargets { code: String },
    /// Admitted and dispatched.
    Delivered(BroadcastReport),
}

impl Outcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::ShuttingDown => "shutting_down",
            Outcome::RejectedSource => "rejected_source",
            Outcome::RejectedFormat => "rejected_format",
            Outcome::RejectedBanned { .. } => "rejected_banned",
            Outcome::RejectedDuplicate { .. } => "rejected_duplicate",
            Outcome::AdmissionFailed { .. } => "admission_failed",
            Outcome::DroppedNoTargets { .. } => "dropped_no_targets",
            Outcome::Delivered(report) if report.is_full() => "delivered_full",
            Outcome::Delivered(_) => "delivered_partial",
        }
    }

    /// Whether the code was admitted by the dedup gate.
    pub fn was_admitted(&self) -> bool {
        matches!(
            self,
            Outcome::DroppedNoTargets { .. } | Outcome::Delivered(_)
        )
    }

    pub fn report(&self) -> Option<&BroadcastReport> {
        match self {
            Outcome::Delivered(report) => Some(report),
            _ => None,
        }
    }
}
