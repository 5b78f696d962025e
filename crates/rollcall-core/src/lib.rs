//! rollcall-core: identity resolution and attendance idempotency engine.
//!
//! Matches a freshly extracted face embedding against the enrolled set,
//! rejects attempts that would bind one face to two identities, and records
//! at most one attendance row per identity per calendar day. Embedding
//! extraction and persistence sit behind the [`Embedder`] and
//! [`AttendanceStore`] traits.

pub mod embedder;
pub mod engine;
pub mod error;
pub mod store;
pub mod types;

pub use embedder::Embedder;
pub use engine::{AttendanceAttempt, EngineSettings, Outcome, ResolutionEngine};
pub use error::{EmbedError, EngineError, StoreError, ValidationError};
pub use store::{AttendanceLedger, AttendanceStore, IdentityStore};
pub use types::{
    AttendanceRecord, CosineMatcher, Embedding, EuclideanMatcher, Identity, MatchResult, Matcher,
    Metric,
};
