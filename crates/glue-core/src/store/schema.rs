//! SQLite schema for the per-rank transport-property cache.
//!
//! Tables:
//! - `transport_cache`: one row per cached result, keyed by the canonical
//!   quantized-state digest. Result columns are immutable after insert; only
//!   the hit-tracking metadata is updated in place.

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// DDL for the transport-property cache table.
pub const TRANSPORT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transport_cache (
    key                  TEXT PRIMARY KEY,
    rank                 INTEGER NOT NULL,
    tag                  TEXT NOT NULL,

    -- quantized input state, for export and debugging
    temperature          REAL NOT NULL,
    density_0            REAL NOT NULL,
    density_1            REAL NOT NULL,
    density_2            REAL NOT NULL,
    density_3            REAL NOT NULL,
    charges_0            REAL NOT NULL,
    charges_1            REAL NOT NULL,
    charges_2            REAL NOT NULL,
    charges_3            REAL NOT NULL,

    -- transport properties
    viscosity            REAL NOT NULL,
    thermal_conductivity REAL NOT NULL,
    diffcoeff_0          REAL NOT NULL,
    diffcoeff_1          REAL NOT NULL,
    diffcoeff_2          REAL NOT NULL,
    diffcoeff_3          REAL NOT NULL,
    diffcoeff_4          REAL NOT NULL,
    diffcoeff_5          REAL NOT NULL,
    diffcoeff_6          REAL NOT NULL,
    diffcoeff_7          REAL NOT NULL,
    diffcoeff_8          REAL NOT NULL,
    diffcoeff_9          REAL NOT NULL,

    provenance           INTEGER NOT NULL,
    created_at           TEXT NOT NULL,
    hit_count            INTEGER NOT NULL DEFAULT 0,
    last_hit_at          TEXT
);

-- Eviction scans by recency
CREATE INDEX IF NOT EXISTS idx_transport_cache_last_hit
    ON transport_cache(last_hit_at, created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_valid_sql() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(TRANSPORT_SCHEMA).unwrap();
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(TRANSPORT_SCHEMA).unwrap();
        conn.execute_batch(TRANSPORT_SCHEMA).unwrap();
    }
}
