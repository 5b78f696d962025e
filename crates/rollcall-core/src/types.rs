use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Face embedding vector produced by the external embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding, if the embedder reports one.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// Always processes all dimensions in index order, so the result is
    /// bit-identical across repeated calls.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled person: external id, display label and current face signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub identity_id: String,
    pub display_name: String,
    pub embedding: Embedding,
}

/// One confirmed presence event. At most one exists per (identity, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity_id: String,
    /// Copy of the identity's name at the time of recording.
    pub display_name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Client-reported confidence, kept verbatim for audit.
    pub confidence: Option<String>,
}

/// An enrolled identity whose embedding passed the acceptance threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identity_id: String,
    pub display_name: String,
    /// Distance or similarity, depending on the matcher.
    pub score: f32,
}

/// Strategy for comparing a probe embedding against the enrolled set.
pub trait Matcher: Send + Sync {
    /// Raw comparison score between two embeddings of equal dimension.
    fn score(&self, probe: &Embedding, enrolled: &Embedding) -> f32;

    /// Whether `score` is within `threshold`. Boundary values are accepted.
    fn accepts(&self, score: f32, threshold: f32) -> bool;

    /// Every enrolled identity within threshold, in gallery order.
    ///
    /// Always scans the whole gallery. Entries whose dimension differs from
    /// the probe never match.
    fn matches(&self, probe: &Embedding, gallery: &[Identity], threshold: f32) -> Vec<MatchResult> {
        let mut hits = Vec::new();
        for identity in gallery {
            if identity.embedding.dim() != probe.dim() {
                tracing::warn!(
                    identity_id = %identity.identity_id,
                    enrolled_dim = identity.embedding.dim(),
                    probe_dim = probe.dim(),
                    "skipping enrolled embedding with mismatched dimension"
                );
                continue;
            }
            let score = self.score(probe, &identity.embedding);
            if self.accepts(score, threshold) {
                hits.push(MatchResult {
                    identity_id: identity.identity_id.clone(),
                    display_name: identity.display_name.clone(),
                    score,
                });
            }
        }
        hits
    }

    /// First identity within threshold, in gallery order.
    fn find_match(
        &self,
        probe: &Embedding,
        gallery: &[Identity],
        threshold: f32,
    ) -> Option<MatchResult> {
        self.matches(probe, gallery, threshold).into_iter().next()
    }
}

/// Euclidean distance matcher: accepts when `distance <= threshold`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn score(&self, probe: &Embedding, enrolled: &Embedding) -> f32 {
        probe.euclidean_distance(enrolled)
    }

    fn accepts(&self, score: f32, threshold: f32) -> bool {
        score <= threshold
    }
}

/// Cosine similarity matcher: accepts when `similarity >= threshold`.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn score(&self, probe: &Embedding, enrolled: &Embedding) -> f32 {
        probe.similarity(enrolled)
    }

    fn accepts(&self, score: f32, threshold: f32) -> bool {
        score >= threshold
    }
}

/// Comparison metric selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    Cosine,
}

impl Metric {
    pub fn matcher(self) -> Box<dyn Matcher> {
        match self {
            Metric::Euclidean => Box::new(EuclideanMatcher),
            Metric::Cosine => Box::new(CosineMatcher),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Euclidean => f.write_str("euclidean"),
            Metric::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}
