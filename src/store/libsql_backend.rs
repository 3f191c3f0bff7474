//! libSQL backend — async implementation of the store traits.
//!
//! Supports local file and in-memory databases. Several relay processes may
//! open the same file; the only cross-process coordination is SQLite's own
//! locking plus the single-statement admission upsert.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::cache::snapshot::{ChannelId, FilterMode, LinkOverride, Owner, OwnerId, TargetChannel};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    ChannelStat, CodeLedger, ConfigRows, ConfigSource, Database, StatsStore,
};

/// How long a writer waits on a locked database file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy timeout: {e}")))?;
        // journal_mode returns a row, so it goes through query().
        conn.query("PRAGMA journal_mode=WAL", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable WAL: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a query expected to yield one integer.
    async fn query_i64(&self, op: &str, sql: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}"))),
            Ok(None) => Err(DatabaseError::Query(format!("{op}: no rows"))),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    /// Run a write and report how many rows it touched.
    async fn execute(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<u64, DatabaseError> {
        self.conn()
            .execute(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn flag(row: &libsql::Row, idx: i32) -> Result<bool, libsql::Error> {
    Ok(row.get::<i64>(idx)? != 0)
}

fn row_to_owner(row: &libsql::Row) -> Result<Owner, libsql::Error> {
    Ok(Owner {
        owner_id: row.get(0)?,
        active: flag(row, 1)?,
        banned: flag(row, 2)?,
        bot_enabled: flag(row, 3)?,
    })
}

fn row_to_target(row: &libsql::Row) -> Result<TargetChannel, libsql::Error> {
    let mode: String = row.get(3)?;
    Ok(TargetChannel {
        owner_id: row.get(0)?,
        channel_id: row.get(1)?,
        paused: flag(row, 2)?,
        // The schema CHECK only admits known modes.
        filter_mode: mode.parse().unwrap_or_default(),
    })
}

fn row_to_override(row: &libsql::Row) -> Result<LinkOverride, libsql::Error> {
    Ok(LinkOverride {
        owner_id: row.get(0)?,
        channel_id: row.get(1)?,
        fragment: row.get(2)?,
        url: row.get(3)?,
    })
}

fn row_to_stat(row: &libsql::Row) -> Result<ChannelStat, libsql::Error> {
    Ok(ChannelStat {
        channel_id: row.get(0)?,
        stat_date: row.get(1)?,
        daily_count: row.get(2)?,
        code_list: row.get(3)?,
    })
}

/// Read every row of `sql` through `map`, failing on the first bad row.
async fn collect_rows<T>(
    conn: &Connection,
    op: &str,
    sql: &str,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Vec<T>, DatabaseError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

    let mut out = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => {
                out.push(map(&row).map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?)
            }
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
    Ok(out)
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl CodeLedger for LibSqlBackend {
    async fn try_claim_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, DatabaseError> {
        let now_ms = millis(now);
        let ttl_ms = ttl_millis(ttl);
        let cutoff = now_ms.saturating_sub(ttl_ms);

        // One statement: insert, or take over an entry whose window closed.
        // An open window makes the conflict branch a no-op (0 rows changed).
        let changed = self
            .execute(
                "try_claim_code",
                "INSERT INTO sent_codes (code, accepted_at, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (code) DO UPDATE
                    SET accepted_at = excluded.accepted_at, expires_at = excluded.expires_at
                    WHERE sent_codes.accepted_at <= ?4",
                params![code, now_ms, now_ms.saturating_add(ttl_ms), cutoff],
            )
            .await?;

        Ok(changed == 1)
    }

    async fn sweep_codes(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<usize, DatabaseError> {
        let cutoff = millis(now).saturating_sub(ttl_millis(ttl));
        let count = self
            .execute(
                "sweep_codes",
                "DELETE FROM sent_codes WHERE accepted_at <= ?1",
                params![cutoff],
            )
            .await?;

        if count > 0 {
            debug!(count, "Deleted expired codes");
        }
        Ok(count as usize)
    }
}

#[async_trait]
impl ConfigSource for LibSqlBackend {
    async fn config_version(&self) -> Result<i64, DatabaseError> {
        self.query_i64(
            "config_version",
            "SELECT version FROM config_version WHERE id = 1",
        )
        .await
    }

    async fn load_config(&self) -> Result<ConfigRows, DatabaseError> {
        let before = self.config_version().await?;
        let conn = self.conn();

        let owners = collect_rows(
            conn,
            "load owners",
            "SELECT id, is_active, is_banned, bot_enabled FROM owners",
            row_to_owner,
        )
        .await?;
        let targets = collect_rows(
            conn,
            "load targets",
            "SELECT owner_id, channel_id, paused, filter_mode FROM targets ORDER BY id ASC",
            row_to_target,
        )
        .await?;
        let overrides = collect_rows(
            conn,
            "load link_overrides",
            "SELECT owner_id, channel_id, fragment, url FROM link_overrides ORDER BY id ASC",
            row_to_override,
        )
        .await?;
        let keywords = collect_rows(
            conn,
            "load keywords",
            "SELECT keyword FROM keywords ORDER BY id ASC",
            |row| row.get::<String>(0),
        )
        .await?;
        let banned_words = collect_rows(
            conn,
            "load banned_words",
            "SELECT word FROM banned_words ORDER BY id ASC",
            |row| row.get::<String>(0),
        )
        .await?;
        let channel_filters = collect_rows(
            conn,
            "load channel_filters",
            "SELECT channel_id, keyword FROM channel_filters ORDER BY id ASC",
            |row| Ok((row.get::<i64>(0)?, row.get::<String>(1)?)),
        )
        .await?;
        let sources = collect_rows(
            conn,
            "load sources",
            "SELECT channel_id FROM sources",
            |row| row.get::<i64>(0),
        )
        .await?;

        let after = self.config_version().await?;
        if after != before {
            return Err(DatabaseError::ConcurrentChange { before, after });
        }

        debug!(
            version = before,
            targets = targets.len(),
            keywords = keywords.len(),
            "Configuration loaded"
        );

        Ok(ConfigRows {
            version: before,
            owners,
            targets,
            overrides,
            keywords,
            banned_words,
            channel_filters,
            sources,
        })
    }
}

#[async_trait]
impl StatsStore for LibSqlBackend {
    async fn record_code_stat(
        &self,
        channel_id: ChannelId,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let stat_date = at.format("%Y-%m-%d").to_string();
        self.execute(
            "record_code_stat",
            "INSERT INTO channel_stats (channel_id, stat_date, daily_count, code_list, last_updated)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT (channel_id, stat_date) DO UPDATE SET
                daily_count = daily_count + 1,
                code_list = CASE WHEN code_list = '' THEN excluded.code_list
                                 ELSE code_list || ',' || excluded.code_list END,
                last_updated = excluded.last_updated",
            params![channel_id, stat_date, code, at.to_rfc3339()],
        )
        .await?;
        Ok(())
    }

    async fn channel_stats(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> Result<Vec<ChannelStat>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT channel_id, stat_date, daily_count, code_list FROM channel_stats
                 WHERE channel_id = ?1 ORDER BY stat_date DESC LIMIT ?2",
                params![channel_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("channel_stats: {e}")))?;

        let mut stats = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_stat(&row) {
                Ok(stat) => stats.push(stat),
                Err(e) => tracing::warn!("Skipping channel_stats row: {e}"),
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Owners & targets ────────────────────────────────────────────

    async fn upsert_owner(&self, owner: &Owner) -> Result<(), DatabaseError> {
        self.execute(
            "upsert_owner",
            "INSERT INTO owners (id, is_active, is_banned, bot_enabled) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET
                is_active = excluded.is_active,
                is_banned = excluded.is_banned,
                bot_enabled = excluded.bot_enabled",
            params![
                owner.owner_id,
                owner.active as i64,
                owner.banned as i64,
                owner.bot_enabled as i64
            ],
        )
        .await?;
        Ok(())
    }

    async fn upsert_target(&self, target: &TargetChannel) -> Result<(), DatabaseError> {
        self.execute(
            "upsert_target",
            "INSERT INTO targets (owner_id, channel_id, paused, filter_mode) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (owner_id, channel_id) DO UPDATE SET
                paused = excluded.paused,
                filter_mode = excluded.filter_mode",
            params![
                target.owner_id,
                target.channel_id,
                target.paused as i64,
                target.filter_mode.as_str()
            ],
        )
        .await?;
        debug!(
            owner_id = target.owner_id,
            channel_id = target.channel_id,
            "Target saved"
        );
        Ok(())
    }

    async fn set_target_paused(
        &self,
        owner_id: OwnerId,
        channel_id: ChannelId,
        paused: bool,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "set_target_paused",
                "UPDATE targets SET paused = ?1 WHERE owner_id = ?2 AND channel_id = ?3",
                params![paused as i64, owner_id, channel_id],
            )
            .await?;
        Ok(count > 0)
    }

    async fn set_filter_mode(
        &self,
        channel_id: ChannelId,
        mode: FilterMode,
    ) -> Result<usize, DatabaseError> {
        let count = self
            .execute(
                "set_filter_mode",
                "UPDATE targets SET filter_mode = ?1 WHERE channel_id = ?2",
                params![mode.as_str(), channel_id],
            )
            .await?;
        Ok(count as usize)
    }

    async fn remove_target(
        &self,
        owner_id: OwnerId,
        channel_id: ChannelId,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "remove_target",
                "DELETE FROM targets WHERE owner_id = ?1 AND channel_id = ?2",
                params![owner_id, channel_id],
            )
            .await?;
        Ok(count > 0)
    }

    // ── Link overrides ──────────────────────────────────────────────

    async fn upsert_link_override(&self, link: &LinkOverride) -> Result<(), DatabaseError> {
        self.execute(
            "upsert_link_override",
            "INSERT INTO link_overrides (owner_id, channel_id, fragment, url) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (owner_id, channel_id, fragment) DO UPDATE SET url = excluded.url",
            params![
                link.owner_id,
                link.channel_id,
                link.fragment.as_str(),
                link.url.as_str()
            ],
        )
        .await?;
        Ok(())
    }

    async fn remove_link_override(
        &self,
        owner_id: OwnerId,
        channel_id: ChannelId,
        fragment: &str,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "remove_link_override",
                "DELETE FROM link_overrides WHERE owner_id = ?1 AND channel_id = ?2 AND fragment = ?3",
                params![owner_id, channel_id, fragment],
            )
            .await?;
        Ok(count > 0)
    }

    // ── Keyword sets & sources ──────────────────────────────────────

    async fn add_keyword(&self, keyword: &str) -> Result<(), DatabaseError> {
        self.execute(
            "add_keyword",
            "INSERT OR IGNORE INTO keywords (keyword) VALUES (?1)",
            params![keyword],
        )
        .await?;
        Ok(())
    }

    async fn remove_keyword(&self, keyword: &str) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "remove_keyword",
                "DELETE FROM keywords WHERE keyword = ?1",
                params![keyword],
            )
            .await?;
        Ok(count > 0)
    }

    async fn add_banned_word(&self, word: &str) -> Result<(), DatabaseError> {
        self.execute(
            "add_banned_word",
            "INSERT OR IGNORE INTO banned_words (word) VALUES (?1)",
            params![word],
        )
        .await?;
        Ok(())
    }

    async fn remove_banned_word(&self, word: &str) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "remove_banned_word",
                "DELETE FROM banned_words WHERE word = ?1",
                params![word],
            )
            .await?;
        Ok(count > 0)
    }

    async fn add_channel_filter(
        &self,
        channel_id: ChannelId,
        keyword: &str,
    ) -> Result<(), DatabaseError> {
        self.execute(
            "add_channel_filter",
            "INSERT OR IGNORE INTO channel_filters (channel_id, keyword) VALUES (?1, ?2)",
            params![channel_id, keyword],
        )
        .await?;
        Ok(())
    }

    async fn remove_channel_filter(
        &self,
        channel_id: ChannelId,
        keyword: &str,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "remove_channel_filter",
                "DELETE FROM channel_filters WHERE channel_id = ?1 AND keyword = ?2",
                params![channel_id, keyword],
            )
            .await?;
        Ok(count > 0)
    }

    async fn add_source(
        &self,
        channel_id: ChannelId,
        name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let name = match name {
            Some(n) => libsql::Value::Text(n.to_string()),
            None => libsql::Value::Null,
        };
        self.execute(
            "add_source",
            "INSERT INTO sources (channel_id, name) VALUES (?1, ?2)
             ON CONFLICT (channel_id) DO UPDATE SET name = excluded.name",
            params![channel_id, name],
        )
        .await?;
        Ok(())
    }

    async fn remove_source(&self, channel_id: ChannelId) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "remove_source",
                "DELETE FROM sources WHERE channel_id = ?1",
                params![channel_id],
            )
            .await?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    const HOUR: Duration = Duration::from_secs(3600);

    // ── Ledger ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn claim_respects_open_window() {
        let db = test_db().await;
        let t0 = Utc::now();

        assert!(db.try_claim_code("ABC", t0, HOUR).await.unwrap());
        assert!(!db.try_claim_code("ABC", t0 + TimeDelta::seconds(1), HOUR).await.unwrap());
        assert!(db.try_claim_code("XYZ", t0, HOUR).await.unwrap());
    }

    #[tokio::test]
    async fn claim_takes_over_closed_window() {
        let db = test_db().await;
        let t0 = Utc::now();

        assert!(db.try_claim_code("ABC", t0, HOUR).await.unwrap());
        assert!(db.try_claim_code("ABC", t0 + TimeDelta::hours(1), HOUR).await.unwrap());
        // The refresh moved accepted_at forward.
        assert!(
            !db.try_claim_code("ABC", t0 + TimeDelta::minutes(90), HOUR)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn sweep_deletes_only_closed_windows() {
        let db = test_db().await;
        let now = Utc::now();
        db.try_claim_code("OLD", now - TimeDelta::hours(3), HOUR).await.unwrap();
        db.try_claim_code("NEW", now, HOUR).await.unwrap();

        assert_eq!(db.sweep_codes(now, HOUR).await.unwrap(), 1);
        assert!(!db.try_claim_code("NEW", now, HOUR).await.unwrap());
    }

    // ── Config ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn admin_writes_bump_version() {
        let db = test_db().await;
        let v0 = db.config_version().await.unwrap();

        db.add_keyword("grand").await.unwrap();
        let v1 = db.config_version().await.unwrap();
        assert!(v1 > v0);

        db.upsert_owner(&Owner::enabled(1)).await.unwrap();
        db.upsert_target(&TargetChannel::new(-100, 1)).await.unwrap();
        let v2 = db.config_version().await.unwrap();
        assert!(v2 > v1);

        // Code claims are not configuration.
        db.try_claim_code("ABC", Utc::now(), HOUR).await.unwrap();
        assert_eq!(db.config_version().await.unwrap(), v2);
    }

    #[tokio::test]
    async fn load_config_reads_every_table() {
        let db = test_db().await;
        db.upsert_owner(&Owner::enabled(1)).await.unwrap();
        db.upsert_owner(&Owner {
            owner_id: 2,
            active: true,
            banned: true,
            bot_enabled: true,
        })
        .await
        .unwrap();
        db.upsert_target(&TargetChannel::new(-100, 1)).await.unwrap();
        db.upsert_target(&TargetChannel::new(-200, 2).with_filter_mode(FilterMode::Filtered))
            .await
            .unwrap();
        db.upsert_link_override(&LinkOverride::new(1, -100, "abc", "https://a.example"))
            .await
            .unwrap();
        db.add_keyword("grand").await.unwrap();
        db.add_banned_word("test").await.unwrap();
        db.add_channel_filter(-200, "promo").await.unwrap();
        db.add_source(-900, Some("feed")).await.unwrap();

        let rows = db.load_config().await.unwrap();
        assert_eq!(rows.version, db.config_version().await.unwrap());
        assert_eq!(rows.owners.len(), 2);
        assert!(rows.owners.iter().any(|o| o.owner_id == 2 && o.banned));
        assert_eq!(rows.targets.len(), 2);
        assert_eq!(rows.targets[0].channel_id, -100);
        assert_eq!(rows.targets[1].filter_mode, FilterMode::Filtered);
        assert_eq!(rows.overrides[0].url, "https://a.example");
        assert_eq!(rows.keywords, vec!["grand".to_string()]);
        assert_eq!(rows.banned_words, vec!["test".to_string()]);
        assert_eq!(rows.channel_filters, vec![(-200, "promo".to_string())]);
        assert_eq!(rows.sources, vec![-900]);
    }

    #[tokio::test]
    async fn target_updates_and_removal() {
        let db = test_db().await;
        db.upsert_target(&TargetChannel::new(-100, 1)).await.unwrap();
        db.upsert_target(&TargetChannel::new(-100, 2)).await.unwrap();

        assert!(db.set_target_paused(1, -100, true).await.unwrap());
        assert!(!db.set_target_paused(9, -100, true).await.unwrap());
        assert_eq!(db.set_filter_mode(-100, FilterMode::Filtered).await.unwrap(), 2);

        let rows = db.load_config().await.unwrap();
        assert!(rows.targets[0].paused);
        assert!(!rows.targets[1].paused);
        assert!(rows.targets.iter().all(|t| t.filter_mode == FilterMode::Filtered));

        assert!(db.remove_target(1, -100).await.unwrap());
        assert!(!db.remove_target(1, -100).await.unwrap());
        assert_eq!(db.load_config().await.unwrap().targets.len(), 1);
    }

    #[tokio::test]
    async fn override_upsert_replaces_url() {
        let db = test_db().await;
        db.upsert_link_override(&LinkOverride::new(1, -100, "abc", "https://old.example"))
            .await
            .unwrap();
        db.upsert_link_override(&LinkOverride::new(1, -100, "abc", "https://new.example"))
            .await
            .unwrap();

        let rows = db.load_config().await.unwrap();
        assert_eq!(rows.overrides.len(), 1);
        assert_eq!(rows.overrides[0].url, "https://new.example");

        assert!(db.remove_link_override(1, -100, "abc").await.unwrap());
        assert!(db.load_config().await.unwrap().overrides.is_empty());
    }

    #[tokio::test]
    async fn keyword_sets_ignore_duplicates() {
        let db = test_db().await;
        db.add_keyword("grand").await.unwrap();
        db.add_keyword("grand").await.unwrap();
        db.add_banned_word("test").await.unwrap();
        db.add_channel_filter(-1, "x").await.unwrap();
        db.add_channel_filter(-1, "x").await.unwrap();

        let rows = db.load_config().await.unwrap();
        assert_eq!(rows.keywords.len(), 1);
        assert_eq!(rows.channel_filters.len(), 1);

        assert!(db.remove_keyword("grand").await.unwrap());
        assert!(db.remove_banned_word("test").await.unwrap());
        assert!(db.remove_channel_filter(-1, "x").await.unwrap());
        assert!(!db.remove_keyword("grand").await.unwrap());
    }

    #[tokio::test]
    async fn sources_add_and_remove() {
        let db = test_db().await;
        db.add_source(-900, None).await.unwrap();
        db.add_source(-900, Some("renamed")).await.unwrap();
        assert_eq!(db.load_config().await.unwrap().sources, vec![-900]);

        assert!(db.remove_source(-900).await.unwrap());
        assert!(db.load_config().await.unwrap().sources.is_empty());
    }

    // ── Stats ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn stats_accumulate_per_day() {
        let db = test_db().await;
        let day1 = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let day2 = day1 + TimeDelta::days(1);

        db.record_code_stat(-100, "AAA", day1).await.unwrap();
        db.record_code_stat(-100, "BBB", day1 + TimeDelta::hours(2)).await.unwrap();
        db.record_code_stat(-100, "CCC", day2).await.unwrap();
        db.record_code_stat(-200, "AAA", day1).await.unwrap();

        let stats = db.channel_stats(-100, 10).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].stat_date, "2026-03-02");
        assert_eq!(stats[0].daily_count, 1);
        assert_eq!(stats[1].stat_date, "2026-03-01");
        assert_eq!(stats[1].daily_count, 2);
        assert_eq!(stats[1].code_list, "AAA,BBB");

        assert_eq!(db.channel_stats(-100, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_file_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("relay.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.add_keyword("grand").await.unwrap();
            db.try_claim_code("ABC", Utc::now(), HOUR).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(db.load_config().await.unwrap().keywords, vec!["grand".to_string()]);
        assert!(!db.try_claim_code("ABC", Utc::now(), HOUR).await.unwrap());
    }
}
