//! Configuration cache: immutable snapshots swapped on version change.

pub mod config_cache;
pub mod snapshot;

pub use config_cache::{ConfigCache, RefreshOutcome, spawn_refresh_task};
pub use snapshot::{ChannelId, ConfigSnapshot, FilterMode, LinkOverride, Owner, OwnerId, TargetChannel};
