use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rollcall_core::{EngineSettings, Metric};
use serde::Deserialize;
use thiserror::Error;

use crate::api::ApiLimits;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP bind address (default: 127.0.0.1:5000).
    pub listen_addr: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Endpoint of the external face embedding service.
    pub embedder_url: String,
    /// Embedding comparison metric.
    pub metric: Metric,
    /// Acceptance threshold: max distance (euclidean) or min similarity (cosine).
    pub match_threshold: f32,
    /// Deadline for one embedder call.
    pub embed_timeout_secs: u64,
    /// Largest accepted decoded image, in bytes.
    pub max_image_bytes: usize,
    /// Number of records returned by the attendance list.
    pub recent_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            listen_addr: "127.0.0.1:5000".to_string(),
            db_path: data_dir.join("attendance.db"),
            embedder_url: "http://127.0.0.1:8600/embed".to_string(),
            metric: Metric::Euclidean,
            match_threshold: 0.6,
            embed_timeout_secs: 10,
            max_image_bytes: 8 * 1024 * 1024,
            recent_limit: 10,
        }
    }
}

impl Config {
    /// Load the optional file at `path`, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok()).validated()
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ROLLCALL_*` overrides from `lookup`. Unparseable values keep
    /// the current setting.
    fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            listen_addr: lookup("ROLLCALL_LISTEN_ADDR").unwrap_or(self.listen_addr),
            db_path: lookup("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(self.db_path),
            embedder_url: lookup("ROLLCALL_EMBEDDER_URL").unwrap_or(self.embedder_url),
            metric: parsed(&lookup, "ROLLCALL_METRIC", self.metric),
            match_threshold: parsed(&lookup, "ROLLCALL_MATCH_THRESHOLD", self.match_threshold),
            embed_timeout_secs: parsed(
                &lookup,
                "ROLLCALL_EMBED_TIMEOUT_SECS",
                self.embed_timeout_secs,
            ),
            max_image_bytes: parsed(&lookup, "ROLLCALL_MAX_IMAGE_BYTES", self.max_image_bytes),
            recent_limit: parsed(&lookup, "ROLLCALL_RECENT_LIMIT", self.recent_limit),
        }
    }

    /// Reject thresholds under which no pair of faces can ever match.
    fn validated(self) -> Result<Self, ConfigError> {
        let threshold = self.match_threshold;
        let reason = if !threshold.is_finite() {
            Some("must be a finite number".to_string())
        } else {
            match self.metric {
                Metric::Euclidean if threshold < 0.0 => {
                    Some("euclidean distance threshold must not be negative".to_string())
                }
                Metric::Cosine if !(-1.0..=1.0).contains(&threshold) => {
                    Some("cosine similarity threshold must lie in [-1, 1]".to_string())
                }
                _ => None,
            }
        };
        match reason {
            Some(reason) => Err(ConfigError::Invalid {
                key: "match_threshold",
                reason: format!("{reason}, got {threshold}"),
            }),
            None => Ok(self),
        }
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            metric: self.metric,
            threshold: self.match_threshold,
            embed_timeout: self.embed_timeout(),
        }
    }

    pub fn api_limits(&self) -> ApiLimits {
        ApiLimits {
            max_image_bytes: self.max_image_bytes,
            recent_limit: self.recent_limit,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable override");
            current
        }),
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_reference_behaviour() {
        let config = Config::default();
        assert_eq!(config.metric, Metric::Euclidean);
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.recent_limit, 10);
        assert!(config.db_path.ends_with("rollcall/attendance.db"));
    }

    #[test]
    fn test_env_overrides_apply() {
        let config = Config::default().with_overrides(lookup(&[
            ("ROLLCALL_METRIC", "cosine"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.42"),
            ("ROLLCALL_DB_PATH", "/var/lib/rollcall/db.sqlite"),
            ("ROLLCALL_RECENT_LIMIT", "25"),
        ]));
        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.match_threshold, 0.42);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/rollcall/db.sqlite"));
        assert_eq!(config.recent_limit, 25);
        assert_eq!(config.listen_addr, "127.0.0.1:5000");
    }

    #[test]
    fn test_unparseable_override_keeps_current_value() {
        let config = Config::default().with_overrides(lookup(&[
            ("ROLLCALL_MATCH_THRESHOLD", "close"),
            ("ROLLCALL_METRIC", "manhattan"),
        ]));
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.metric, Metric::Euclidean);
    }

    #[test]
    fn test_non_finite_threshold_is_rejected() {
        for raw in ["nan", "NaN", "inf", "-inf"] {
            let config = Config::default()
                .with_overrides(lookup(&[("ROLLCALL_MATCH_THRESHOLD", raw)]));
            assert!(
                matches!(
                    config.validated(),
                    Err(ConfigError::Invalid { key: "match_threshold", .. })
                ),
                "{raw} accepted"
            );
        }
    }

    #[test]
    fn test_threshold_range_depends_on_metric() {
        let negative = Config::default()
            .with_overrides(lookup(&[("ROLLCALL_MATCH_THRESHOLD", "-0.1")]));
        assert!(negative.validated().is_err());

        let cosine = Config::default().with_overrides(lookup(&[
            ("ROLLCALL_METRIC", "cosine"),
            ("ROLLCALL_MATCH_THRESHOLD", "-0.1"),
        ]));
        assert!(cosine.validated().is_ok());

        let cosine_too_high = Config::default().with_overrides(lookup(&[
            ("ROLLCALL_METRIC", "cosine"),
            ("ROLLCALL_MATCH_THRESHOLD", "1.5"),
        ]));
        assert!(cosine_too_high.validated().is_err());

        assert!(Config::default().validated().is_ok());
    }

    #[test]
    fn test_file_values_then_env() {
        let dir = std::env::temp_dir().join(format!("rollcalld-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rollcall.toml");
        std::fs::write(
            &path,
            "listen_addr = \"0.0.0.0:8080\"\nmetric = \"cosine\"\nmatch_threshold = 0.5\n",
        )
        .unwrap();

        let config = Config::from_file(&path)
            .unwrap()
            .with_overrides(lookup(&[("ROLLCALL_MATCH_THRESHOLD", "0.45")]));
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.embed_timeout_secs, 10);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_bad_file_is_parse_error() {
        let dir = std::env::temp_dir().join(format!("rollcalld-badconfig-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rollcall.toml");
        std::fs::write(&path, "match_threshold = \"high\"\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));

        std::fs::write(&path, "match_threshold = nan\n").unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert!(matches!(loaded.validated(), Err(ConfigError::Invalid { .. })));

        assert!(matches!(
            Config::from_file(&dir.join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
