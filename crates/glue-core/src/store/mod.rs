//! Per-rank persistent store handle and result cache.
//!
//! One `Store` per distributed rank, exclusively owned by the rank process
//! that opened it. Inserts are write-through: the transaction commits before
//! the call returns, so a reported insert is never lost to a crash. The
//! connection is serialized behind a mutex; readers and writers never observe
//! a torn entry.

pub(crate) mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::key::StateKey;
use crate::model::{FluidState, Provenance, TransportProperties, DIFFUSION_LEN};
use schema::{SCHEMA_VERSION, TRANSPORT_SCHEMA};

/// Persistence-layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be opened or accessed (permissions, disk full,
    /// corruption).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Insert collision: an entry for this key already exists. Two
    /// computations for a tolerance-equivalent state should agree, so a
    /// collision signals a tolerance-policy bug worth surfacing.
    #[error("duplicate cache key: {0}")]
    DuplicateKey(String),

    #[error("database error: {0}")]
    Sql(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sql(e.to_string())
    }
}

/// A fully materialized cache row, as returned by [`Store::export_entries`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub state: FluidState,
    pub value: TransportProperties,
    pub tag: String,
    pub rank: u32,
    pub provenance: Provenance,
    pub created_at: String,
    pub hit_count: u64,
}

/// SQLite-backed cache of solver results, one per rank.
#[derive(Clone, Debug)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    rank: u32,
    max_entries: Option<u64>,
}

impl Store {
    /// Open (or create) the rank's store at `path`.
    ///
    /// Reopening the same path recovers all previously committed entries.
    pub fn open(rank: u32, path: &Path, config: &CacheConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Unavailable(format!("failed to open {}: {e}", path.display()))
        })?;
        Self::init_connection(&conn)?;
        info!(rank, path = %path.display(), "opened transport cache store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            rank,
            max_entries: config.max_entries,
        })
    }

    /// Create an in-memory store (for testing).
    pub fn memory(rank: u32, config: &CacheConfig) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("failed to open in-memory db: {e}")))?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            rank,
            max_entries: config.max_entries,
        })
    }

    fn init_connection(conn: &Connection) -> Result<(), StoreError> {
        // WAL for concurrent readers; synchronous=FULL so a committed insert
        // survives power loss (write-through durability contract).
        // journal_mode returns a row and is a no-op for in-memory DBs.
        let _ = conn
            .query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .optional();
        conn.execute_batch("PRAGMA synchronous = FULL;")?;
        conn.execute_batch(TRANSPORT_SCHEMA)?;
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 0 {
            conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        } else if version != SCHEMA_VERSION {
            return Err(StoreError::Unavailable(format!(
                "schema version mismatch: found {version}, expected {SCHEMA_VERSION}"
            )));
        }
        Ok(())
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Exact-match lookup. Bumps hit metadata on a hit.
    pub fn lookup(&self, key: &StateKey) -> Result<Option<TransportProperties>, StoreError> {
        let digest = key.digest();
        let conn = self.conn.lock().unwrap();
        let found: Option<TransportProperties> = conn
            .query_row(
                "SELECT viscosity, thermal_conductivity,
                        diffcoeff_0, diffcoeff_1, diffcoeff_2, diffcoeff_3, diffcoeff_4,
                        diffcoeff_5, diffcoeff_6, diffcoeff_7, diffcoeff_8, diffcoeff_9
                 FROM transport_cache WHERE key = ?1",
                [&digest],
                row_to_properties,
            )
            .optional()?;

        if found.is_some() {
            conn.execute(
                "UPDATE transport_cache
                 SET hit_count = hit_count + 1, last_hit_at = ?1
                 WHERE key = ?2",
                params![Utc::now().to_rfc3339(), digest],
            )?;
        }
        Ok(found)
    }

    /// Write-through insert. Rejects an existing key with `DuplicateKey`;
    /// evicts least-recently-used entries beyond the capacity bound inside
    /// the same transaction.
    pub fn insert(
        &self,
        key: &StateKey,
        value: &TransportProperties,
        tag: &str,
        provenance: Provenance,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        // BEGIN IMMEDIATE acquires the write lock up front
        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = self.insert_inner(&conn, key, value, tag, provenance);
        match &result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
            }
            Err(_) => {
                let _ = conn.execute("ROLLBACK", []);
            }
        }
        result
    }

    fn insert_inner(
        &self,
        conn: &Connection,
        key: &StateKey,
        value: &TransportProperties,
        tag: &str,
        provenance: Provenance,
    ) -> Result<(), StoreError> {
        let digest = key.digest();
        let state = key.decode();
        let d = &state.density;
        let c = &state.charges;
        let dc = &value.diffusion;

        let inserted = conn.execute(
            "INSERT INTO transport_cache (
                key, rank, tag,
                temperature, density_0, density_1, density_2, density_3,
                charges_0, charges_1, charges_2, charges_3,
                viscosity, thermal_conductivity,
                diffcoeff_0, diffcoeff_1, diffcoeff_2, diffcoeff_3, diffcoeff_4,
                diffcoeff_5, diffcoeff_6, diffcoeff_7, diffcoeff_8, diffcoeff_9,
                provenance, created_at, hit_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24,
                      ?25, ?26, 0)",
            params![
                digest,
                self.rank,
                tag,
                state.temperature,
                d[0],
                d[1],
                d[2],
                d[3],
                c[0],
                c[1],
                c[2],
                c[3],
                value.viscosity,
                value.thermal_conductivity,
                dc[0],
                dc[1],
                dc[2],
                dc[3],
                dc[4],
                dc[5],
                dc[6],
                dc[7],
                dc[8],
                dc[9],
                provenance.as_i64(),
                Utc::now().to_rfc3339(),
            ],
        );

        if let Err(e) = inserted {
            if e.to_string().contains("UNIQUE constraint failed") {
                warn!(key = %digest, "duplicate cache key on insert");
                return Err(StoreError::DuplicateKey(digest));
            }
            return Err(e.into());
        }

        self.evict_excess(conn)?;
        Ok(())
    }

    /// Evict least-recently-used entries while the table exceeds the bound.
    fn evict_excess(&self, conn: &Connection) -> Result<(), StoreError> {
        let Some(cap) = self.max_entries else {
            return Ok(());
        };
        // a bound beyond i64 can never be exceeded by a row count
        let cap = i64::try_from(cap).unwrap_or(i64::MAX);
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM transport_cache", [], |row| row.get(0))?;
        let excess = count - cap;
        if excess <= 0 {
            return Ok(());
        }
        let evicted = conn.execute(
            "DELETE FROM transport_cache WHERE key IN (
                 SELECT key FROM transport_cache
                 ORDER BY COALESCE(last_hit_at, created_at) ASC, created_at ASC
                 LIMIT ?1
             )",
            params![excess],
        )?;
        debug!(evicted, cap, "evicted least-recently-used cache entries");
        Ok(())
    }

    /// Number of cached entries.
    pub fn len(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM transport_cache", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Dump all entries, oldest first (training-data extraction path).
    pub fn export_entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, rank, tag,
                    temperature, density_0, density_1, density_2, density_3,
                    charges_0, charges_1, charges_2, charges_3,
                    viscosity, thermal_conductivity,
                    diffcoeff_0, diffcoeff_1, diffcoeff_2, diffcoeff_3, diffcoeff_4,
                    diffcoeff_5, diffcoeff_6, diffcoeff_7, diffcoeff_8, diffcoeff_9,
                    provenance, created_at, hit_count
             FROM transport_cache ORDER BY created_at ASC, key ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let mut density = [0.0; 4];
            let mut charges = [0.0; 4];
            for (i, d) in density.iter_mut().enumerate() {
                *d = row.get(4 + i)?;
            }
            for (i, c) in charges.iter_mut().enumerate() {
                *c = row.get(8 + i)?;
            }
            let mut diffusion = [0.0; DIFFUSION_LEN];
            for (i, d) in diffusion.iter_mut().enumerate() {
                *d = row.get(14 + i)?;
            }
            Ok(CacheEntry {
                key: row.get(0)?,
                rank: row.get::<_, i64>(1)? as u32,
                tag: row.get(2)?,
                state: FluidState {
                    temperature: row.get(3)?,
                    density,
                    charges,
                },
                value: TransportProperties {
                    viscosity: row.get(12)?,
                    thermal_conductivity: row.get(13)?,
                    diffusion,
                },
                provenance: Provenance::from_i64(row.get(24)?),
                created_at: row.get(25)?,
                hit_count: row.get::<_, i64>(26)? as u64,
            })
        })?;
        let mut entries = Vec::new();
        for r in rows {
            entries.push(r?);
        }
        Ok(entries)
    }

    /// Flush the WAL to the main database file. Idempotent; the handle stays
    /// usable. Remaining state is released when the last clone drops.
    pub fn close(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let _ = conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .optional()?;
        Ok(())
    }
}

fn row_to_properties(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransportProperties> {
    let mut diffusion = [0.0; DIFFUSION_LEN];
    for (i, d) in diffusion.iter_mut().enumerate() {
        *d = row.get(2 + i)?;
    }
    Ok(TransportProperties {
        viscosity: row.get(0)?,
        thermal_conductivity: row.get(1)?,
        diffusion,
    })
}
