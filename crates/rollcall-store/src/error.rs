//! Error type for `rollcall-store`.

use chrono::NaiveDate;
use rollcall_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("date/time parse error: {0}")]
    DateParse(String),

    #[error("corrupt embedding for {identity_id}: {reason}")]
    CorruptEmbedding { identity_id: String, reason: String },

    /// The `(identity_id, date)` unique index rejected an insert.
    #[error("attendance for {identity_id} on {date} already recorded")]
    Duplicate { identity_id: String, date: NaiveDate },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::Duplicate { identity_id, date } => {
                StoreError::ConstraintViolation { identity_id, date }
            }
            Error::DateParse(_) | Error::CorruptEmbedding { .. } => {
                StoreError::Corrupt(err.to_string())
            }
            Error::Database(_) => StoreError::Backend(Box::new(err)),
        }
    }
}
