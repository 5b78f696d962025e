//! Error taxonomy shared by the engine, its stores and the API layer.

use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

/// Malformed attendance attempt. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("confidence must be a string or a number")]
    InvalidConfidence,
    #[error("image payload is not valid base64")]
    InvalidBase64,
    #[error("image payload is not a recognised image format")]
    NotAnImage,
    #[error("image payload is {size} bytes, limit is {max}")]
    ImageTooLarge { size: usize, max: usize },
}

#[derive(Error, Debug)]
pub enum EmbedError {
    /// The image contains no detectable face. A domain outcome, not a fault.
    #[error("no face found in image")]
    NoFaceFound,
    #[error("embedder failed: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// An attendance row already exists for this identity and day.
    #[error("attendance for {identity_id} on {date} already recorded")]
    ConstraintViolation {
        identity_id: String,
        date: NaiveDate,
    },
    #[error("corrupt stored row: {0}")]
    Corrupt(String),
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedError),
    #[error("embedder did not answer within {0:?}")]
    EmbedderTimeout(Duration),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}
