//! Backing-store traits.
//!
//! The relay needs three narrow capabilities from storage, each its own
//! trait so components depend only on what they use:
//! - `CodeLedger`: atomic conditional upsert for dedup admission
//! - `ConfigSource`: version counter + full configuration read
//! - `StatsStore`: per-channel delivery statistics
//!
//! `Database` bundles them with the admin writes used by tooling and tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::snapshot::{ChannelId, FilterMode, LinkOverride, Owner, OwnerId, TargetChannel};
use crate::error::DatabaseError;

/// Raw configuration rows, read together under one version.
#[derive(Debug, Clone, Default)]
pub struct ConfigRows {
    pub version: i64,
    pub owners: Vec<Owner>,
    /// In insertion order; the broadcaster relies on this for owner precedence.
    pub targets: Vec<TargetChannel>,
    pub overrides: Vec<LinkOverride>,
    pub keywords: Vec<String>,
    pub banned_words: Vec<String>,
    pub channel_filters: Vec<(ChannelId, String)>,
    pub sources: Vec<ChannelId>,
}

/// A single day's delivery statistics for one target channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStat {
    pub channel_id: ChannelId,
    pub stat_date: String,
    pub daily_count: i64,
    pub code_list: String,
}

/// Dedup storage: one atomic admission primitive plus eviction.
#[async_trait]
pub trait CodeLedger: Send + Sync {
    /// Insert `code` if absent, or refresh it if its last acceptance is at
    /// least `ttl` old. Returns true when this call claimed the code.
    ///
    /// Must be a single atomic operation; a separate read and write is not
    /// an acceptable implementation.
    async fn try_claim_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, DatabaseError>;

    /// Delete codes whose window has closed. Returns the number removed.
    async fn sweep_codes(&self, now: DateTime<Utc>, ttl: Duration)
    -> Result<usize, DatabaseError>;
}

/// Read side of the configuration cache.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Current value of the monotonically increasing config version counter.
    async fn config_version(&self) -> Result<i64, DatabaseError>;

    /// Read every configuration table. The returned rows all belong to
    /// `ConfigRows::version`.
    async fn load_config(&self) -> Result<ConfigRows, DatabaseError>;
}

/// Delivery statistics sink.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Count one delivered code against today's row for `channel_id`.
    async fn record_code_stat(
        &self,
        channel_id: ChannelId,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Statistics for one channel, most recent day first.
    async fn channel_stats(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> Result<Vec<ChannelStat>, DatabaseError>;
}

/// Full database interface: the relay's read paths plus admin writes.
///
/// Every admin write bumps the config version (enforced by the schema), so
/// running caches pick changes up on their next check.
#[async_trait]
pub trait Database: CodeLedger + ConfigSource + StatsStore {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Owners & targets ────────────────────────────────────────────

    /// Insert or update an owner.
    async fn upsert_owner(&self, owner: &Owner) -> Result<(), DatabaseError>;

    /// Attach a target channel to an owner (or update its settings).
    async fn upsert_target(&self, target: &TargetChannel) -> Result<(), DatabaseError>;

    /// Pause or resume one owner's target.
    async fn set_target_paused(
        &self,
        owner_id: OwnerId,
        channel_id: ChannelId,
        paused: bool,
    ) -> Result<bool, DatabaseError>;

    /// Switch every owner's entry for `channel_id` to `mode`.
    async fn set_filter_mode(
        &self,
        channel_id: ChannelId,
        mode: FilterMode,
    ) -> Result<usize, DatabaseError>;

    /// Detach a target channel from an owner.
    async fn remove_target(
        &self,
        owner_id: OwnerId,
        channel_id: ChannelId,
    ) -> Result<bool, DatabaseError>;

    // ── Link overrides ──────────────────────────────────────────────

    /// Add an override; an existing (owner, channel, fragment) gets the new URL.
    async fn upsert_link_override(&self, link: &LinkOverride) -> Result<(), DatabaseError>;

    async fn remove_link_override(
        &self,
        owner_id: OwnerId,
        channel_id: ChannelId,
        fragment: &str,
    ) -> Result<bool, DatabaseError>;

    // ── Keyword sets & sources ──────────────────────────────────────

    async fn add_keyword(&self, keyword: &str) -> Result<(), DatabaseError>;

    async fn remove_keyword(&self, keyword: &str) -> Result<bool, DatabaseError>;

    async fn add_banned_word(&self, word: &str) -> Result<(), DatabaseError>;

    async fn remove_banned_word(&self, word: &str) -> Result<bool, DatabaseError>;

    async fn add_channel_filter(
        &self,
        channel_id: ChannelId,
        keyword: &str,
    ) -> Result<(), DatabaseError>;

    async fn remove_channel_filter(
        &self,
        channel_id: ChannelId,
        keyword: &str,
    ) -> Result<bool, DatabaseError>;

    async fn add_source(&self, channel_id: ChannelId, name: Option<&str>)
    -> Result<(), DatabaseError>;

    async fn remove_source(&self, channel_id: ChannelId) -> Result<bool, DatabaseError>;
}
