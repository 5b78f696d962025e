//! Persistence traits for enrolled identities and the attendance ledger.
//!
//! Implemented by storage backends (e.g. `rollcall-store`). The engine and
//! the daemon depend on these traits, not on a concrete backend. All methods
//! return `Send` futures so the stores can be shared across a multi-threaded
//! runtime.

use std::future::Future;

use chrono::NaiveDate;

use crate::error::StoreError;
use crate::types::{AttendanceRecord, Identity};

/// Mapping from identity id to its current embedding.
pub trait IdentityStore: Send + Sync {
    /// Every enrolled identity, in a stable store order.
    fn list_all(&self) -> impl Future<Output = Result<Vec<Identity>, StoreError>> + Send + '_;

    /// Insert the identity or replace the row with the same `identity_id`.
    fn upsert(&self, identity: Identity)
        -> impl Future<Output = Result<(), StoreError>> + Send + '_;

    /// Number of enrolled identities.
    fn count(&self) -> impl Future<Output = Result<usize, StoreError>> + Send + '_;
}

/// Append-only log of attendance records.
pub trait AttendanceLedger: Send + Sync {
    /// Whether a record exists for `identity_id` on `date`.
    fn has_record_for<'a>(
        &'a self,
        identity_id: &'a str,
        date: NaiveDate,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send + 'a;

    /// Append a record.
    ///
    /// Fails with [`StoreError::ConstraintViolation`] if one already exists
    /// for the same identity and date.
    fn append(&self, record: AttendanceRecord)
        -> impl Future<Output = Result<(), StoreError>> + Send + '_;

    /// The `limit` most recent records, newest date then newest time first.
    /// Equal date/time rows keep insertion order.
    fn recent(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<AttendanceRecord>, StoreError>> + Send + '_;
}

/// A store holding both identities and the ledger, able to write to both
/// atomically.
pub trait AttendanceStore: IdentityStore + AttendanceLedger {
    /// Upsert `identity` and append `record` as one unit: both become visible
    /// or neither does. A duplicate (identity, date) rolls back the upsert and
    /// returns [`StoreError::ConstraintViolation`].
    fn commit_attendance(
        &self,
        identity: Identity,
        record: AttendanceRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send + '_;
}
