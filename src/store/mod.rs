//! Persistence layer — libSQL-backed ledger, configuration and statistics.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ChannelStat, CodeLedger, ConfigRows, ConfigSource, Database, StatsStore};
