use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::db::AnalysisRecord;
use crate::model::{AnalysisResult, FileResult};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// A stored file record could not be encoded or decoded.
    #[error("Invalid stored file record: {0}")]
    Record(#[from] serde_json::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

pub type DbResult<T> = Result<T, DbError>;

/// SQLite store of analysis runs.
///
/// Each run is one `analyses` row keyed by the top-level firmware uid, plus one
/// `analysis_files` row per file holding the full `FileResult` as JSON.
#[derive(Debug)]
pub struct ResultsDb {
    conn: Connection,
}

impl ResultsDb {
    /// Open (or create) a results database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Persist one analysis run and return its row id.
    pub fn insert_analysis(&self, firmware_uid: &str, result: &AnalysisResult) -> DbResult<i64> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO analyses
                (firmware_uid, parent_flag, file_count, executable_count, incomplete_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                firmware_uid,
                result.parent_flag,
                result.files.len() as i64,
                result.executable_count() as i64,
                result.incomplete_count() as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let analysis_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO analysis_files (analysis_id, uid, path, executable, status, record)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for file in result.files.values() {
                let record = serde_json::to_string(file)?;
                stmt.execute(params![
                    analysis_id,
                    file.uid,
                    file.path,
                    file.executable,
                    file.status.as_str(),
                    record
                ])?;
            }
        }

        tx.commit()?;
        Ok(analysis_id)
    }

    /// Most recent run id stored for a firmware uid.
    pub fn latest_analysis_id(&self, firmware_uid: &str) -> DbResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                r#"
                SELECT id FROM analyses
                WHERE firmware_uid = ?1
                ORDER BY id DESC
                LIMIT 1
                "#,
                params![firmware_uid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Load the most recent analysis stored for a firmware uid, if any.
    ///
    /// `parent_flag` is set when any run under the uid was stored as a parent, so
    /// child runs stored later do not hide the container marker.
    pub fn load_analysis(&self, firmware_uid: &str) -> DbResult<Option<AnalysisResult>> {
        let Some(analysis_id) = self.latest_analysis_id(firmware_uid)? else {
            return Ok(None);
        };

        let parent_flag: bool = self.conn.query_row(
            "SELECT MAX(parent_flag) FROM analyses WHERE firmware_uid = ?1",
            params![firmware_uid],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT uid, record FROM analysis_files
            WHERE analysis_id = ?1
            ORDER BY id
            "#,
        )?;
        let files = collect_files(stmt.query_map(params![analysis_id], file_row)?)?;

        Ok(Some(AnalysisResult { files, parent_flag }))
    }

    /// Every file stored under a firmware uid across all of its runs.
    ///
    /// When a uid was stored more than once the latest record wins. The mapping
    /// may be partial while child analyses are still being persisted.
    pub fn load_child_files(&self, firmware_uid: &str) -> DbResult<BTreeMap<String, FileResult>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.uid, f.record
            FROM analysis_files f
            JOIN analyses a ON a.id = f.analysis_id
            WHERE a.firmware_uid = ?1
            ORDER BY f.id
            "#,
        )?;
        let files = collect_files(stmt.query_map(params![firmware_uid], file_row)?)?;
        Ok(files)
    }

    /// List stored runs (ordered by id).
    pub fn list_analyses(&self) -> DbResult<Vec<AnalysisRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, firmware_uid, parent_flag, file_count, executable_count, incomplete_count, created_at
            FROM analyses
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AnalysisRecord {
                id: row.get(0)?,
                firmware_uid: row.get(1)?,
                parent_flag: row.get(2)?,
                file_count: row.get::<_, i64>(3)? as usize,
                executable_count: row.get::<_, i64>(4)? as usize,
                incomplete_count: row.get::<_, i64>(5)? as usize,
                created_at: row.get(6)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn collect_files(
    rows: impl Iterator<Item = rusqlite::Result<(String, String)>>,
) -> DbResult<BTreeMap<String, FileResult>> {
    let mut files = BTreeMap::new();
    for row in rows {
        let (uid, record) = row?;
        let file: FileResult = serde_json::from_str(&record)?;
        files.insert(uid, file);
    }
    Ok(files)
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: analyses and analysis_files tables
/// - 2: lookup indexes on firmware uid and file uid
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let mut current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS analyses (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                firmware_uid     TEXT NOT NULL,
                parent_flag      INTEGER NOT NULL DEFAULT 0,
                file_count       INTEGER NOT NULL,
                executable_count INTEGER NOT NULL,
                incomplete_count INTEGER NOT NULL DEFAULT 0,
                created_at       TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS analysis_files (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_id INTEGER NOT NULL REFERENCES analyses(id),
                uid         TEXT NOT NULL,
                path        TEXT NOT NULL,
                executable  INTEGER NOT NULL,
                status      TEXT NOT NULL,
                record      TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
        current_version = 1;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE INDEX IF NOT EXISTS idx_analyses_firmware_uid ON analyses (firmware_uid);
            CREATE INDEX IF NOT EXISTS idx_analysis_files_uid ON analysis_files (uid);
            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
