//! libSQL storage for the append-only finding log.
//!
//! The [`FindingLog`] wraps a libSQL database (a local file, or a remote
//! Turso/libSQL server) holding one table, `breaches`. Rows are only ever
//! inserted; nothing here updates or deletes a finding.

mod migrations;

use std::path::Path;

use breachwatch_shared::{BreachWatchError, DatabaseConfig, Result};
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tracing::{debug, info, instrument};

/// One row of the `breaches` table.
#[derive(Debug, Clone, PartialEq)]
pub struct FindingRow {
    /// Auto-generated identity key.
    pub id: i64,
    /// The identifier that was looked up.
    pub query: String,
    /// Serialized finding payload.
    pub data: String,
    /// Write time.
    pub date: DateTime<Utc>,
}

/// Handle to the relational finding log.
pub struct FindingLog {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl FindingLog {
    /// Open or create a local database file at `path`.
    ///
    /// The schema is not touched; call [`FindingLog::ensure_schema`] before writing.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| BreachWatchError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        Self::from_database(db)
    }

    /// Connect to a remote libSQL server.
    pub async fn open_remote(url: &str, auth_token: &str) -> Result<Self> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(storage_err)?;
        Self::from_database(db)
    }

    /// Open whichever database `config` points at.
    pub async fn connect(config: &DatabaseConfig, auth_token: Option<&str>) -> Result<Self> {
        match (&config.url, auth_token) {
            (Some(url), Some(token)) => {
                debug!(%url, "opening remote finding log");
                Self::open_remote(url, token).await
            }
            (Some(_), None) => Err(BreachWatchError::config(format!(
                "database.url is set but {} is empty",
                config.auth_token_env
            ))),
            (None, _) => {
                debug!(path = %config.path, "opening local finding log");
                Self::open(Path::new(&config.path)).await
            }
        }
    }

    fn from_database(db: Database) -> Result<Self> {
        let conn = db.connect().map_err(storage_err)?;
        Ok(Self { db, conn })
    }

    /// Create the `breaches` table and apply pending migrations.
    ///
    /// Safe to call any number of times.
    #[instrument(skip_all)]
    pub async fn ensure_schema(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        BreachWatchError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Append one finding. Returns the generated row id.
    pub async fn insert_finding(&self, query: &str, data: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO breaches (query, data) VALUES (?1, ?2)",
                params![query, data],
            )
            .await
            .map_err(storage_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// All findings for `query`, newest first.
    pub async fn list_findings(&self, query: &str) -> Result<Vec<FindingRow>> {
        let rows = self
            .conn
            .query(
                "SELECT id, query, data, date FROM breaches
                 WHERE query = ?1 ORDER BY date DESC, id DESC",
                params![query],
            )
            .await
            .map_err(storage_err)?;
        collect_rows(rows).await
    }

    /// Number of rows per distinct query, ordered by query.
    pub async fn count_by_query(&self) -> Result<Vec<(String, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT query, COUNT(*) FROM breaches GROUP BY query ORDER BY query",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let query: String = row.get(0).map_err(storage_err)?;
            let count: i64 = row.get(1).map_err(storage_err)?;
            results.push((query, count.max(0) as u64));
        }
        Ok(results)
    }

    /// Total number of rows.
    pub async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM breaches", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
            None => Ok(0),
        }
    }
}

async fn collect_rows(mut rows: libsql::Rows) -> Result<Vec<FindingRow>> {
    let mut results = Vec::new();
    while let Some(row) = rows.next().await.map_err(storage_err)? {
        results.push(row_to_finding(&row)?);
    }
    Ok(results)
}

/// Convert a database row to a [`FindingRow`].
fn row_to_finding(row: &libsql::Row) -> Result<FindingRow> {
    let date: String = row.get(3).map_err(storage_err)?;
    Ok(FindingRow {
        id: row.get::<i64>(0).map_err(storage_err)?,
        query: row.get::<String>(1).map_err(storage_err)?,
        data: row.get::<String>(2).map_err(storage_err)?,
        date: DateTime::parse_from_rfc3339(&date)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| BreachWatchError::Storage(format!("invalid date {date:?}: {e}")))?,
    })
}

fn storage_err(e: impl std::fmt::Display) -> BreachWatchError {
    BreachWatchError::Storage(e.to_string())
}
