//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "relay_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS owners (
                id INTEGER PRIMARY KEY,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_banned INTEGER NOT NULL DEFAULT 0,
                bot_enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS targets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                channel_id INTEGER NOT NULL,
                paused INTEGER NOT NULL DEFAULT 0,
                filter_mode TEXT NOT NULL DEFAULT 'all'
                    CHECK (filter_mode IN ('all', 'filtered')),
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (owner_id, channel_id)
            );
            CREATE INDEX IF NOT EXISTS idx_targets_channel ON targets(channel_id);

            CREATE TABLE IF NOT EXISTS link_overrides (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                channel_id INTEGER NOT NULL,
                fragment TEXT NOT NULL,
                url TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (owner_id, channel_id, fragment)
            );

            CREATE TABLE IF NOT EXISTS keywords (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                keyword TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS banned_words (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                word TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS channel_filters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id INTEGER NOT NULL,
                keyword TEXT NOT NULL,
                UNIQUE (channel_id, keyword)
            );

            CREATE TABLE IF NOT EXISTS sources (
                channel_id INTEGER PRIMARY KEY,
                name TEXT
            );

            CREATE TABLE IF NOT EXISTS sent_codes (
                code TEXT PRIMARY KEY,
                accepted_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sent_codes_accepted ON sent_codes(accepted_at);

            CREATE TABLE IF NOT EXISTS channel_stats (
                channel_id INTEGER NOT NULL,
                stat_date TEXT NOT NULL,
                daily_count INTEGER NOT NULL DEFAULT 0,
                code_list TEXT NOT NULL DEFAULT '',
                last_updated TEXT NOT NULL,
                PRIMARY KEY (channel_id, stat_date)
            );
        "#,
    },
    Migration {
        version: 2,
        name: "config_version_counter",
        // Every write to a configuration table bumps the counter, whoever
        // the writer is.
        sql: r#"
            CREATE TABLE IF NOT EXISTS config_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO config_version (id, version) VALUES (1, 1);

            CREATE TRIGGER IF NOT EXISTS trg_owners_ins AFTER INSERT ON owners BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_owners_upd AFTER UPDATE ON owners BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_owners_del AFTER DELETE ON owners BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;

            CREATE TRIGGER IF NOT EXISTS trg_targets_ins AFTER INSERT ON targets BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_targets_upd AFTER UPDATE ON targets BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_targets_del AFTER DELETE ON targets BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;

            CREATE TRIGGER IF NOT EXISTS trg_link_overrides_ins AFTER INSERT ON link_overrides BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_link_overrides_upd AFTER UPDATE ON link_overrides BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_link_overrides_del AFTER DELETE ON link_overrides BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;

            CREATE TRIGGER IF NOT EXISTS trg_keywords_ins AFTER INSERT ON keywords BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_keywords_upd AFTER UPDATE ON keywords BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_keywords_del AFTER DELETE ON keywords BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;

            CREATE TRIGGER IF NOT EXISTS trg_banned_words_ins AFTER INSERT ON banned_words BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_banned_words_upd AFTER UPDATE ON banned_words BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_banned_words_del AFTER DELETE ON banned_words BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;

            CREATE TRIGGER IF NOT EXISTS trg_channel_filters_ins AFTER INSERT ON channel_filters BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_channel_filters_upd AFTER UPDATE ON channel_filters BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_channel_filters_del AFTER DELETE ON channel_filters BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;

            CREATE TRIGGER IF NOT EXISTS trg_sources_ins AFTER INSERT ON sources BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_sources_upd AFTER UPDATE ON sources BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
            CREATE TRIGGER IF NOT EXISTS trg_sources_del AFTER DELETE ON sources BEGIN UPDATE config_version SET version = version + 1 WHERE id = 1; END;
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
