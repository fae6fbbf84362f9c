//! Database schema migrations.
//!
//! Applies the initial schema: the attributes, events and
//! schema_migrations tables.

use rusqlite::Connection;
use tracing::info;

use beacon_core::error::BeaconError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<(), BeaconError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| BeaconError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| BeaconError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), BeaconError> {
    conn.execute_batch(
        "
        -- Persistent user attributes, one row per name.
        CREATE TABLE IF NOT EXISTS attributes (
            name            TEXT PRIMARY KEY NOT NULL,
            value_kind      TEXT NOT NULL
                            CHECK (value_kind IN ('string', 'double', 'bool')),
            string_value    TEXT,
            double_value    REAL,
            bool_value      INTEGER,
            persistent      INTEGER NOT NULL DEFAULT 1,
            updated_at      INTEGER NOT NULL
        );

        -- Buffered events awaiting harvest, stored as their flat JSON form.
        CREATE TABLE IF NOT EXISTS events (
            id              TEXT PRIMARY KEY NOT NULL,
            timestamp       INTEGER NOT NULL,
            payload         TEXT NOT NULL,
            stored_at       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_timestamp
            ON events (timestamp ASC);

        -- Record migration.
        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| BeaconError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        // Running again should be idempotent.
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_attributes_table_exists() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO attributes (name, value_kind, string_value, updated_at)
             VALUES ('plan', 'string', 'pro', 1700000000000)",
            [],
        )
        .unwrap();

        let value: String = conn
            .query_row(
                "SELECT string_value FROM attributes WHERE name = 'plan'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(value, "pro");
    }

    #[test]
    fn test_events_table_exists() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO events (id, timestamp, payload, stored_at)
             VALUES ('ev-1', 1700000000000, '{}', 1700000000000)",
            [],
        )
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_attribute_kind_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO attributes (name, value_kind, updated_at) VALUES ('bad', 'void', 0)",
            [],
        );
        assert!(result.is_err());
    }
}
