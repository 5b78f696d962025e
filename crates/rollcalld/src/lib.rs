//! rollcalld: HTTP front end for the Rollcall attendance engine.

pub mod api;
pub mod config;
pub mod embedder;
pub mod error;

pub use api::{router, ApiLimits, AppState};
pub use config::{Config, ConfigError};
pub use embedder::HttpEmbedder;
pub use error::ApiError;
