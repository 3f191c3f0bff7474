//! Configuration snapshot: the immutable view every message is processed against.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::traits::ConfigRows;

/// Telegram chat id of a source or target channel.
pub type ChannelId = i64;

/// Id of the entity controlling a target's overrides and pause state.
pub type OwnerId = i64;

/// Which codes a target channel accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Every admitted code.
    #[default]
    All,
    /// Only codes matching the channel's filter keywords.
    Filtered,
}

impl FilterMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterMode::All => "all",
            FilterMode::Filtered => "filtered",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(FilterMode::All),
            "filtered" => Ok(FilterMode::Filtered),
            other => Err(format!("unknown filter mode: {other}")),
        }
    }
}

/// Account state of a target owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub owner_id: OwnerId,
    pub active: bool,
    pub banned: bool,
    pub bot_enabled: bool,
}

impl Owner {
    /// An active, unbanned owner with the bot switched on.
    pub fn enabled(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            active: true,
            banned: false,
            bot_enabled: true,
        }
    }

    /// Whether this owner's targets may receive broadcasts.
    pub fn can_broadcast(&self) -> bool {
        self.active && !self.banned && self.bot_enabled
    }
}

/// A destination channel as configured by one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetChannel {
    pub channel_id: ChannelId,
    pub owner_id: OwnerId,
    pub paused: bool,
    pub filter_mode: FilterMode,
}

impl TargetChannel {
    /// An unpaused target receiving every code.
    pub fn new(channel_id: ChannelId, owner_id: OwnerId) -> Self {
        Self {
            channel_id,
            owner_id,
            paused: false,
            filter_mode: FilterMode::All,
        }
    }

    pub fn with_filter_mode(mut self, mode: FilterMode) -> Self {
        self.filter_mode = mode;
        self
    }

    pub fn paused(mut self) -> Self {
        self.paused = true;
        self
    }
}

/// Owner-specific link replacement for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOverride {
    pub owner_id: OwnerId,
    pub channel_id: ChannelId,
    /// Matched case-insensitively against the code and the default link.
    pub fragment: String,
    pub url: String,
}

impl LinkOverride {
    pub fn new(
        owner_id: OwnerId,
        channel_id: ChannelId,
        fragment: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            channel_id,
            fragment: fragment.into(),
            url: url.into(),
        }
    }
}

/// Immutable configuration snapshot.
///
/// Built once from `ConfigRows` and shared behind an `Arc`; refreshes
/// replace the whole value. Keyword, banned-word and filter terms are
/// lowercased at construction so matching never re-normalizes them.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub version: i64,
    pub fetched_at: DateTime<Utc>,
    pub targets: Vec<TargetChannel>,
    pub overrides: Vec<LinkOverride>,
    pub keywords: HashSet<String>,
    pub banned_words: Vec<String>,
    owners: HashMap<OwnerId, Owner>,
    channel_filters: HashMap<ChannelId, Vec<String>>,
    sources: HashSet<ChannelId>,
}

impl ConfigSnapshot {
    /// Build a snapshot from freshly loaded rows.
    pub fn from_rows(rows: ConfigRows) -> Self {
        Self::from_rows_at(rows, Utc::now())
    }

    pub fn from_rows_at(rows: ConfigRows, fetched_at: DateTime<Utc>) -> Self {
        let owners = rows
            .owners
            .into_iter()
            .map(|o| (o.owner_id, o))
            .collect();

        let mut channel_filters: HashMap<ChannelId, Vec<String>> = HashMap::new();
        for (channel_id, keyword) in rows.channel_filters {
            let keyword = normalize(&keyword);
            if keyword.is_empty() {
                continue;
            }
            let entry = channel_filters.entry(channel_id).or_default();
            if !entry.contains(&keyword) {
                entry.push(keyword);
            }
        }

        let mut banned_words: Vec<String> = Vec::with_capacity(rows.banned_words.len());
        for word in rows.banned_words.iter().map(|w| normalize(w)) {
            if !word.is_empty() && !banned_words.contains(&word) {
                banned_words.push(word);
            }
        }

        Self {
            version: rows.version,
            fetched_at,
            targets: rows.targets,
            overrides: rows.overrides,
            keywords: rows
                .keywords
                .iter()
                .map(|k| normalize(k))
                .filter(|k| !k.is_empty())
                .collect(),
            banned_words,
            owners,
            channel_filters,
            sources: rows.sources.into_iter().collect(),
        }
    }

    /// Look up a target owner.
    pub fn owner(&self, owner_id: OwnerId) -> Option<&Owner> {
        self.owners.get(&owner_id)
    }

    /// Owners without a row are not eligible.
    pub fn owner_can_broadcast(&self, owner_id: OwnerId) -> bool {
        self.owner(owner_id).is_some_and(Owner::can_broadcast)
    }

    /// The filter keywords of a `filtered` channel (lowercase). Empty if none.
    pub fn channel_filter(&self, channel_id: ChannelId) -> &[String] {
        self.channel_filters
            .get(&channel_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether messages from `channel_id` are monitored.
    pub fn is_source(&self, channel_id: ChannelId) -> bool {
        self.sources.contains(&channel_id)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Overrides one owner configured for one channel, in load order.
    pub fn overrides_for(
        &self,
        owner_id: OwnerId,
        channel_id: ChannelId,
    ) -> impl Iterator<Item = &LinkOverride> {
        self.overrides
            .iter()
            .filter(move |o| o.owner_id == owner_id && o.channel_id == channel_id)
    }
}

/// Trim and lowercase a configured term.
pub(crate) fn normalize(term: &str) -> String {
    term.trim().to_lowercase()
}
