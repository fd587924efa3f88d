//! SQLite-backed analysis store implementation.

use super::models::{Lookup, StoreFailure, StoreFailureKind};
use super::schema::ANALYSIS_VERSIONED_SCHEMAS;
use super::share_id::{self, MAX_SHARE_ID_ATTEMPTS};
use super::trait_def::AnalysisStore;
use crate::analysis::models::{AnalysisRecord, AnalysisResult};
use crate::analysis::query::normalize;
use crate::sqlite_persistence::{read_schema_version, BASE_DB_VERSION};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SELECT_RECORD: &str = "SELECT id, share_id, normalized_artist, normalized_title, artist, \
     title, result, created_at, updated_at, access_count FROM analyses";

const SECONDS_PER_DAY: i64 = 86_400;

/// SQLite-backed analysis store.
#[derive(Clone)]
pub struct SqliteAnalysisStore {
    conn: Arc<Mutex<Connection>>,
}

fn migrate_if_needed(conn: &mut Connection) -> Result<()> {
    let latest_version = ANALYSIS_VERSIONED_SCHEMAS.len() - 1;
    let latest_schema = &ANALYSIS_VERSIONED_SCHEMAS[latest_version];

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?;

    if table_count == 0 {
        info!("Creating analysis db schema at version {}", latest_version);
        latest_schema.create(conn)?;
        return Ok(());
    }

    let db_version = read_schema_version(conn)?;
    if db_version < 0 {
        bail!("Analysis database has no recognizable schema version");
    }
    let mut current_version = db_version as usize;
    if current_version > latest_version {
        bail!(
            "Analysis database version {} is newer than supported version {}",
            current_version,
            latest_version
        );
    }

    if current_version < latest_version {
        let tx = conn.transaction()?;
        for schema in ANALYSIS_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!(
                    "Migrating analysis db from version {} to {}",
                    current_version, schema.version
                );
                migration_fn(&tx)?;
            }
            current_version = schema.version;
        }
        tx.pragma_update(None, "user_version", BASE_DB_VERSION + current_version)?;
        tx.commit()?;
    }

    latest_schema
        .validate(conn)
        .context("Analysis database schema does not match")
}

/// Columns of an `analyses` row before conversion.
struct RawRecord {
    id: String,
    share_id: String,
    normalized_artist: String,
    normalized_title: String,
    artist: String,
    title: String,
    result: String,
    created_at: i64,
    updated_at: i64,
    access_count: i64,
}

impl RawRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            share_id: row.get(1)?,
            normalized_artist: row.get(2)?,
            normalized_title: row.get(3)?,
            artist: row.get(4)?,
            title: row.get(5)?,
            result: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            access_count: row.get(9)?,
        })
    }
}

impl TryFrom<RawRecord> for AnalysisRecord {
    type Error = StoreFailure;

    fn try_from(raw: RawRecord) -> Result<Self, StoreFailure> {
        let result: AnalysisResult = serde_json::from_str(&raw.result)?;
        Ok(AnalysisRecord {
            id: raw.id,
            share_id: raw.share_id,
            normalized_artist: raw.normalized_artist,
            normalized_title: raw.normalized_title,
            artist: raw.artist,
            title: raw.title,
            result,
            created_at: timestamp(raw.created_at)?,
            updated_at: timestamp(raw.updated_at)?,
            access_count: u64::try_from(raw.access_count).map_err(|_| {
                StoreFailure::new(StoreFailureKind::Corrupt, "negative access count")
            })?,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, StoreFailure> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        StoreFailure::new(
            StoreFailureKind::Corrupt,
            format!("timestamp {} out of range", secs),
        )
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl SqliteAnalysisStore {
    /// Opens (creating if needed) the analysis database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let mut conn = Connection::open_with_flags(
            db_path.as_ref(),
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open analysis database")?;

        migrate_if_needed(&mut conn)?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on analysis database")?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM analyses", [], |r| r.get(0))?;
        info!("Analysis store ready: {} analyses stored", count);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Store over a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrate_if_needed(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find_by_key(
        conn: &Connection,
        normalized_artist: &str,
        normalized_title: &str,
    ) -> Result<Option<AnalysisRecord>, StoreFailure> {
        let raw = conn
            .prepare_cached(&format!(
                "{} WHERE normalized_artist = ?1 AND normalized_title = ?2",
                SELECT_RECORD
            ))?
            .query_row(params![normalized_artist, normalized_title], RawRecord::from_row)
            .optional()?;
        raw.map(AnalysisRecord::try_from).transpose()
    }

    fn find_by_share_id(
        conn: &Connection,
        share_id: &str,
    ) -> Result<Option<AnalysisRecord>, StoreFailure> {
        let raw = conn
            .prepare_cached(&format!("{} WHERE share_id = ?1", SELECT_RECORD))?
            .query_row(params![share_id], RawRecord::from_row)
            .optional()?;
        raw.map(AnalysisRecord::try_from).transpose()
    }

    fn touch_by_key(
        &self,
        normalized_artist: &str,
        normalized_title: &str,
    ) -> Result<Option<AnalysisRecord>, StoreFailure> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE analyses SET access_count = access_count + 1, updated_at = ?1
             WHERE normalized_artist = ?2 AND normalized_title = ?3",
            params![Utc::now().timestamp(), normalized_artist, normalized_title],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        Self::find_by_key(&conn, normalized_artist, normalized_title)
    }

    fn touch_by_share_id(&self, share_id: &str) -> Result<Option<AnalysisRecord>, StoreFailure> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE analyses SET access_count = access_count + 1, updated_at = ?1
             WHERE share_id = ?2",
            params![Utc::now().timestamp(), share_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        Self::find_by_share_id(&conn, share_id)
    }
}

impl AnalysisStore for SqliteAnalysisStore {
    fn get_cached_analysis(&self, artist: &str, title: &str) -> Lookup<AnalysisRecord> {
        let normalized_artist = normalize(artist);
        let normalized_title = normalize(title);
        let lookup: Lookup<AnalysisRecord> =
            self.touch_by_key(&normalized_artist, &normalized_title).into();
        if let Lookup::Failed(failure) = &lookup {
            warn!("Analysis lookup failed: {}", failure);
        }
        lookup
    }

    fn store_analysis(
        &self,
        result: &AnalysisResult,
        share_id: Option<&str>,
    ) -> Result<AnalysisRecord, StoreFailure> {
        if let Some(id) = share_id {
            if !share_id::is_valid_share_id(id) {
                return Err(StoreFailure::new(
                    StoreFailureKind::Invalid,
                    format!("malformed share id {:?}", id),
                ));
            }
        }

        let normalized_artist = normalize(&result.artist);
        let normalized_title = normalize(&result.song_title);
        let payload = serde_json::to_string(result)?;
        let now = Utc::now().timestamp();
        let attempts = if share_id.is_some() {
            1
        } else {
            MAX_SHARE_ID_ATTEMPTS
        };

        let conn = self.conn();
        for attempt in 0..attempts {
            let candidate = match share_id {
                Some(id) => id.to_string(),
                None => share_id::candidate(&result.artist, &result.song_title, attempt),
            };
            let id = Uuid::new_v4().to_string();

            let inserted = conn.execute(
                "INSERT INTO analyses
                 (id, share_id, normalized_artist, normalized_title, artist, title, result,
                  created_at, updated_at, access_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 1)",
                params![
                    id,
                    candidate,
                    normalized_artist,
                    normalized_title,
                    result.artist,
                    result.song_title,
                    payload,
                    now,
                ],
            );

            match inserted {
                Ok(_) => {
                    debug!("Stored analysis {} with share id {}", id, candidate);
                    return Ok(AnalysisRecord {
                        id,
                        share_id: candidate,
                        normalized_artist,
                        normalized_title,
                        artist: result.artist.clone(),
                        title: result.song_title.clone(),
                        result: result.clone(),
                        created_at: timestamp(now)?,
                        updated_at: timestamp(now)?,
                        access_count: 1,
                    });
                }
                Err(err) if is_constraint_violation(&err) => {
                    if let Some(existing) =
                        Self::find_by_key(&conn, &normalized_artist, &normalized_title)?
                    {
                        debug!(
                            "Analysis for {}::{} already stored as {}",
                            normalized_artist, normalized_title, existing.share_id
                        );
                        return Ok(existing);
                    }
                    debug!("Share id {} taken, trying another", candidate);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StoreFailure::new(
            StoreFailureKind::Conflict,
            format!("no free share id after {} attempts", attempts),
        ))
    }

    fn get_analysis_by_share_id(&self, share_id: &str) -> Lookup<AnalysisRecord> {
        if !share_id::is_valid_share_id(share_id) {
            return Lookup::NotFound;
        }
        let lookup: Lookup<AnalysisRecord> = self.touch_by_share_id(share_id).into();
        if let Lookup::Failed(failure) = &lookup {
            warn!("Share lookup failed: {}", failure);
        }
        lookup
    }

    fn cleanup_old_analyses(
        &self,
        days_old: u32,
        min_access_count: u64,
    ) -> Result<usize, StoreFailure> {
        let cutoff = Utc::now().timestamp() - i64::from(days_old) * SECONDS_PER_DAY;
        let min_access_count = i64::try_from(min_access_count).unwrap_or(i64::MAX);
        let deleted = self.conn().execute(
            "DELETE FROM analyses WHERE created_at < ?1 AND access_count < ?2",
            params![cutoff, min_access_count],
        )?;
        Ok(deleted)
    }

    fn count_analyses(&self) -> Result<usize, StoreFailure> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM analyses", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}
