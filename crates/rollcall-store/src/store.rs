//! [`SqliteStore`]: the SQLite implementation of [`AttendanceStore`].

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::TransactionBehavior;
use rollcall_core::{
    AttendanceLedger, AttendanceRecord, AttendanceStore, Identity, IdentityStore, StoreError,
};

use crate::{
    encode::{encode_date, RawIdentity, RawRecord},
    schema::SCHEMA,
    Error, Result,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// Identities and attendance backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted and every
/// call is serialised on its worker thread.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    /// Open (or create) a store at `path` and run schema initialisation.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store, useful for testing.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.busy_timeout(BUSY_TIMEOUT)?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        tracing::debug!("schema initialised");
        Ok(())
    }

    async fn list_identities(&self) -> Result<Vec<Identity>> {
        let raws: Vec<RawIdentity> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT identity_id, display_name, embedding, model_version
                     FROM identities
                     ORDER BY identity_id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(RawIdentity {
                            identity_id: row.get(0)?,
                            display_name: row.get(1)?,
                            embedding: row.get(2)?,
                            model_version: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        raws.into_iter().map(RawIdentity::into_identity).collect()
    }

    async fn upsert_identity(&self, identity: &Identity) -> Result<()> {
        let raw = RawIdentity::from_identity(identity);
        self.conn
            .call(move |conn| {
                upsert_identity_row(conn, &raw)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn count_identities(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM identities", [], |r| r.get(0))?))
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn record_exists(&self, identity_id: &str, date: NaiveDate) -> Result<bool> {
        let identity_id = identity_id.to_string();
        let date_str = encode_date(date);
        let exists: i64 = self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT EXISTS(
                       SELECT 1 FROM attendance WHERE identity_id = ?1 AND date = ?2
                     )",
                    rusqlite::params![identity_id, date_str],
                    |r| r.get(0),
                )?)
            })
            .await?;
        Ok(exists == 1)
    }

    async fn append_record(&self, record: &AttendanceRecord) -> Result<()> {
        let raw = RawRecord::from_record(record);
        let inserted = self
            .conn
            .call(move |conn| match insert_record_row(conn, &raw) {
                Ok(()) => Ok(true),
                Err(e) if is_unique_violation(&e) => Ok(false),
                Err(e) => Err(e.into()),
            })
            .await?;

        if !inserted {
            return Err(duplicate(record));
        }
        Ok(())
    }

    async fn recent_records(&self, limit: usize) -> Result<Vec<AttendanceRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let raws: Vec<RawRecord> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT identity_id, display_name, date, time, confidence
                     FROM attendance
                     ORDER BY date DESC, time DESC, id ASC
                     LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![limit], |row| {
                        Ok(RawRecord {
                            identity_id: row.get(0)?,
                            display_name: row.get(1)?,
                            date: row.get(2)?,
                            time: row.get(3)?,
                            confidence: row.get(4)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        raws.into_iter().map(RawRecord::into_record).collect()
    }

    /// Upsert + append in one `IMMEDIATE` transaction. Dropping the
    /// transaction on a duplicate rolls the upsert back.
    async fn commit(&self, identity: &Identity, record: &AttendanceRecord) -> Result<()> {
        let raw_identity = RawIdentity::from_identity(identity);
        let raw_record = RawRecord::from_record(record);

        let committed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                upsert_identity_row(&tx, &raw_identity)?;
                match insert_record_row(&tx, &raw_record) {
                    Ok(()) => {}
                    Err(e) if is_unique_violation(&e) => return Ok(false),
                    Err(e) => return Err(e.into()),
                }
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !committed {
            return Err(duplicate(record));
        }
        Ok(())
    }
}

fn upsert_identity_row(conn: &rusqlite::Connection, raw: &RawIdentity) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO identities (identity_id, display_name, embedding, model_version)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(identity_id) DO UPDATE SET
            display_name  = excluded.display_name,
            embedding     = excluded.embedding,
            model_version = excluded.model_version",
        rusqlite::params![
            raw.identity_id,
            raw.display_name,
            raw.embedding,
            raw.model_version,
        ],
    )?;
    Ok(())
}

fn insert_record_row(conn: &rusqlite::Connection, raw: &RawRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO attendance (identity_id, display_name, date, time, confidence)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            raw.identity_id,
            raw.display_name,
            raw.date,
            raw.time,
            raw.confidence,
        ],
    )?;
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn duplicate(record: &AttendanceRecord) -> Error {
    Error::Duplicate {
        identity_id: record.identity_id.clone(),
        date: record.date,
    }
}

// ─── Trait impls ─────────────────────────────────────────────────────────────

impl IdentityStore for SqliteStore {
    async fn list_all(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.list_identities().await?)
    }

    async fn upsert(&self, identity: Identity) -> Result<(), StoreError> {
        Ok(self.upsert_identity(&identity).await?)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.count_identities().await?)
    }
}

impl AttendanceLedger for SqliteStore {
    async fn has_record_for<'a>(
        &'a self,
        identity_id: &'a str,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        Ok(self.record_exists(identity_id, date).await?)
    }

    async fn append(&self, record: AttendanceRecord) -> Result<(), StoreError> {
        Ok(self.append_record(&record).await?)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self.recent_records(limit).await?)
    }
}

impl AttendanceStore for SqliteStore {
    async fn commit_attendance(
        &self,
        identity: Identity,
        record: AttendanceRecord,
    ) -> Result<(), StoreError> {
        Ok(self.commit(&identity, &record).await?)
    }
}
