//! Attendance resolution: one attempt in, exactly one [`Outcome`] out.
//!
//! Decision order per attempt:
//!
//! 1. extract the embedding (no store access until it is in hand)
//! 2. reject if the face matches a *different* enrolled identity
//! 3. short-circuit if today's record already exists
//! 4. upsert the identity and append today's record in one commit
//!
//! Only step 4 writes. A unique-key failure in step 4 means a concurrent
//! attempt won the race and is reported as [`Outcome::AlreadyMarked`].

use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};

use crate::embedder::Embedder;
use crate::error::{EmbedError, EngineError, StoreError, ValidationError};
use crate::store::AttendanceStore;
use crate::types::{AttendanceRecord, Identity, Matcher, Metric};

const MAX_IDENTITY_ID_LEN: usize = 128;
const MAX_DISPLAY_NAME_LEN: usize = 256;

/// A validated attendance attempt.
#[derive(Debug, Clone)]
pub struct AttendanceAttempt {
    pub identity_id: String,
    pub display_name: String,
    pub image: Vec<u8>,
    pub confidence: Option<String>,
}

impl AttendanceAttempt {
    /// Trim and validate the caller-supplied fields.
    pub fn new(
        identity_id: &str,
        display_name: &str,
        image: Vec<u8>,
        confidence: Option<String>,
    ) -> Result<Self, ValidationError> {
        let identity_id = required("identity_id", identity_id, MAX_IDENTITY_ID_LEN)?;
        let display_name = required("display_name", display_name, MAX_DISPLAY_NAME_LEN)?;
        if image.is_empty() {
            return Err(ValidationError::MissingField("image"));
        }
        Ok(Self {
            identity_id,
            display_name,
            image,
            confidence,
        })
    }
}

fn required(field: &'static str, value: &str, max: usize) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(value.to_string())
}

/// Terminal state of one attendance attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Identity (re-)enrolled and today's record written.
    Recorded(AttendanceRecord),
    /// Today's record already existed. Nothing written.
    AlreadyMarked,
    /// The face belongs to another enrolled identity. Nothing written.
    FaceConflict { conflicting_id: String, score: f32 },
    /// The embedder found no face. Nothing written.
    NoFaceDetected,
}

/// Matching parameters for a [`ResolutionEngine`].
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub metric: Metric,
    pub threshold: f32,
    pub embed_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            metric: Metric::Euclidean,
            threshold: 0.6,
            embed_timeout: Duration::from_secs(10),
        }
    }
}

/// Orchestrates matcher, identity store and ledger for attendance attempts.
pub struct ResolutionEngine<S, E> {
    store: S,
    embedder: E,
    matcher: Box<dyn Matcher>,
    settings: EngineSettings,
}

impl<S, E> ResolutionEngine<S, E>
where
    S: AttendanceStore,
    E: Embedder,
{
    pub fn new(store: S, embedder: E, settings: EngineSettings) -> Self {
        Self {
            store,
            embedder,
            matcher: settings.metric.matcher(),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve an attempt against the server's current local date and time.
    pub async fn resolve(&self, attempt: AttendanceAttempt) -> Result<Outcome, EngineError> {
        self.resolve_at(attempt, Local::now().naive_local()).await
    }

    /// Resolve an attempt as of `now`. Every date comparison in the attempt
    /// uses `now.date()`.
    pub async fn resolve_at(
        &self,
        attempt: AttendanceAttempt,
        now: NaiveDateTime,
    ) -> Result<Outcome, EngineError> {
        let today = now.date();
        let identity_id = attempt.identity_id.as_str();

        let extracted = tokio::time::timeout(
            self.settings.embed_timeout,
            self.embedder.extract(&attempt.image),
        )
        .await;
        let candidate = match extracted {
            Err(_) => return Err(EngineError::EmbedderTimeout(self.settings.embed_timeout)),
            Ok(Err(EmbedError::NoFaceFound)) => {
                tracing::info!(identity_id, "no face detected");
                return Ok(Outcome::NoFaceDetected);
            }
            Ok(result) => result?,
        };
        tracing::debug!(identity_id, dim = candidate.dim(), "embedding extracted");

        let enrolled = self.store.list_all().await?;
        let foreign = self
            .matcher
            .matches(&candidate, &enrolled, self.settings.threshold)
            .into_iter()
            .find(|hit| hit.identity_id != identity_id);
        if let Some(hit) = foreign {
            tracing::warn!(
                identity_id,
                conflicting_id = %hit.identity_id,
                score = hit.score,
                "face already linked to another identity"
            );
            return Ok(Outcome::FaceConflict {
                conflicting_id: hit.identity_id,
                score: hit.score,
            });
        }

        if self.store.has_record_for(identity_id, today).await? {
            tracing::info!(identity_id, %today, "attendance already marked");
            return Ok(Outcome::AlreadyMarked);
        }

        let record = AttendanceRecord {
            identity_id: attempt.identity_id.clone(),
            display_name: attempt.display_name.clone(),
            date: today,
            time: now.time().with_nanosecond(0).unwrap_or_else(|| now.time()),
            confidence: attempt.confidence,
        };
        let identity = Identity {
            identity_id: attempt.identity_id,
            display_name: attempt.display_name,
            embedding: candidate,
        };

        match self.store.commit_attendance(identity, record.clone()).await {
            Ok(()) => {
                tracing::info!(
                    identity_id = %record.identity_id,
                    date = %record.date,
                    time = %record.time,
                    "attendance recorded"
                );
                Ok(Outcome::Recorded(record))
            }
            Err(StoreError::ConstraintViolation { identity_id, date }) => {
                tracing::info!(%identity_id, %date, "concurrent attempt recorded first");
                Ok(Outcome::AlreadyMarked)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The `limit` most recent attendance records.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AttendanceRecord>, EngineError> {
        Ok(self.store.recent(limit).await?)
    }

    /// Number of enrolled identities.
    pub async fn enrolled_count(&self) -> Result<usize, EngineError> {
        Ok(self.store.count().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AttendanceLedger, IdentityStore};
    use crate::types::Embedding;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        identities: Mutex<BTreeMap<String, Identity>>,
        records: Mutex<Vec<AttendanceRecord>>,
        // Simulates a concurrent writer: existence checks miss committed rows.
        stale_reads: AtomicBool,
    }

    impl MemoryStore {
        fn identity(&self, id: &str) -> Option<Identity> {
            self.identities.lock().unwrap().get(id).cloned()
        }

        fn record_count(&self) -> usize {
            self.records.lock().unwrap().len()
        }
    }

    impl IdentityStore for MemoryStore {
        async fn list_all(&self) -> Result<Vec<Identity>, StoreError> {
            Ok(self.identities.lock().unwrap().values().cloned().collect())
        }

        async fn upsert(&self, identity: Identity) -> Result<(), StoreError> {
            self.identities
                .lock()
                .unwrap()
                .insert(identity.identity_id.clone(), identity);
            Ok(())
        }

        async fn count(&self) -> Result<usize, StoreError> {
            Ok(self.identities.lock().unwrap().len())
        }
    }

    impl AttendanceLedger for MemoryStore {
        async fn has_record_for<'a>(
            &'a self,
            identity_id: &'a str,
            date: NaiveDate,
        ) -> Result<bool, StoreError> {
            if self.stale_reads.load(Ordering::SeqCst) {
                return Ok(false);
            }
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .any(|r| r.identity_id == identity_id && r.date == date))
        }

        async fn append(&self, record: AttendanceRecord) -> Result<(), StoreError> {
            let mut records = self.records.lock().unwrap();
            if records
                .iter()
                .any(|r| r.identity_id == record.identity_id && r.date == record.date)
            {
                return Err(StoreError::ConstraintViolation {
                    identity_id: record.identity_id,
                    date: record.date,
                });
            }
            records.push(record);
            Ok(())
        }

        async fn recent(&self, limit: usize) -> Result<Vec<AttendanceRecord>, StoreError> {
            let mut records = self.records.lock().unwrap().clone();
            records.sort_by(|a, b| (b.date, b.time).cmp(&(a.date, a.time)));
            records.truncate(limit);
            Ok(records)
        }
    }

    impl AttendanceStore for MemoryStore {
        async fn commit_attendance(
            &self,
            identity: Identity,
            record: AttendanceRecord,
        ) -> Result<(), StoreError> {
            let mut identities = self.identities.lock().unwrap();
            let mut records = self.records.lock().unwrap();
            if records
                .iter()
                .any(|r| r.identity_id == record.identity_id && r.date == record.date)
            {
                return Err(StoreError::ConstraintViolation {
                    identity_id: record.identity_id,
                    date: record.date,
                });
            }
            identities.insert(identity.identity_id.clone(), identity);
            records.push(record);
            Ok(())
        }
    }

    /// Maps image bytes to a canned embedding; `None` means no face.
    #[derive(Default)]
    struct ScriptedEmbedder {
        faces: HashMap<Vec<u8>, Option<Vec<f32>>>,
        delay: Option<Duration>,
    }

    impl ScriptedEmbedder {
        fn with(mut self, image: &[u8], face: Option<Vec<f32>>) -> Self {
            self.faces.insert(image.to_vec(), face);
            self
        }
    }

    impl Embedder for ScriptedEmbedder {
        async fn extract<'a>(&'a self, image: &'a [u8]) -> Result<Embedding, EmbedError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.faces.get(image) {
                Some(Some(values)) => Ok(Embedding::new(values.clone())),
                Some(None) => Err(EmbedError::NoFaceFound),
                None => Err(EmbedError::Backend("unknown image".into())),
            }
        }
    }

    fn engine(embedder: ScriptedEmbedder) -> ResolutionEngine<MemoryStore, ScriptedEmbedder> {
        ResolutionEngine::new(MemoryStore::default(), embedder, EngineSettings::default())
    }

    fn attempt(id: &str, image: &[u8]) -> AttendanceAttempt {
        AttendanceAttempt::new(id, &format!("Person {id}"), image.to_vec(), Some("0.97".into()))
            .unwrap()
    }

    fn at(day: u32, hms: (u32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hms.0, hms.1, hms.2)
            .unwrap()
    }

    #[tokio::test]
    async fn test_same_identity_twice_same_day_is_idempotent() {
        let engine = engine(ScriptedEmbedder::default().with(b"alice", Some(vec![0.1, 0.2])));

        let first = engine.resolve_at(attempt("A", b"alice"), at(1, (9, 0, 0))).await.unwrap();
        let second = engine.resolve_at(attempt("A", b"alice"), at(1, (17, 30, 0))).await.unwrap();

        match first {
            Outcome::Recorded(record) => {
                assert_eq!(record.identity_id, "A");
                assert_eq!(record.display_name, "Person A");
                assert_eq!(record.time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
                assert_eq!(record.confidence.as_deref(), Some("0.97"));
            }
            other => panic!("expected Recorded, got {other:?}"),
        }
        assert_eq!(second, Outcome::AlreadyMarked);
        assert_eq!(engine.store().record_count(), 1);
    }

    #[tokio::test]
    async fn test_face_of_other_identity_is_conflict() {
        let engine = engine(
            ScriptedEmbedder::default()
                .with(b"alice", Some(vec![0.1, 0.2]))
                .with(b"alice-again", Some(vec![0.15, 0.2])),
        );

        engine.resolve_at(attempt("A", b"alice"), at(1, (9, 0, 0))).await.unwrap();
        let outcome = engine
            .resolve_at(attempt("B", b"alice-again"), at(1, (9, 5, 0)))
            .await
            .unwrap();

        match outcome {
            Outcome::FaceConflict { conflicting_id, .. } => assert_eq!(conflicting_id, "A"),
            other => panic!("expected FaceConflict, got {other:?}"),
        }
        assert!(engine.store().identity("B").is_none());
        assert_eq!(engine.store().record_count(), 1);
    }

    #[tokio::test]
    async fn test_conflict_checked_before_already_marked() {
        let engine = engine(
            ScriptedEmbedder::default()
                .with(b"alice", Some(vec![0.1, 0.2]))
                .with(b"bob", Some(vec![5.0, 5.0])),
        );

        engine.resolve_at(attempt("A", b"alice"), at(1, (9, 0, 0))).await.unwrap();
        engine.resolve_at(attempt("B", b"bob"), at(1, (9, 1, 0))).await.unwrap();

        // B already marked today, but presents A's face.
        let outcome = engine.resolve_at(attempt("B", b"alice"), at(1, (9, 2, 0))).await.unwrap();
        assert!(matches!(outcome, Outcome::FaceConflict { .. }));
        assert_eq!(
            engine.store().identity("B").unwrap().embedding.values,
            vec![5.0, 5.0]
        );
    }

    #[tokio::test]
    async fn test_self_match_does_not_hide_foreign_match() {
        let engine = engine(ScriptedEmbedder::default().with(b"between", Some(vec![0.0, 0.5])));
        // A sorts before B, so the scan sees the self-match first.
        for (id, values) in [("A", vec![0.0, 0.0]), ("B", vec![0.0, 1.0])] {
            engine
                .store()
                .upsert(Identity {
                    identity_id: id.into(),
                    display_name: format!("Person {id}"),
                    embedding: Embedding::new(values),
                })
                .await
                .unwrap();
        }

        let outcome = engine.resolve_at(attempt("A", b"between"), at(2, (8, 0, 0))).await.unwrap();
        match outcome {
            Outcome::FaceConflict { conflicting_id, score } => {
                assert_eq!(conflicting_id, "B");
                assert_eq!(score, 0.5);
            }
            other => panic!("expected FaceConflict, got {other:?}"),
        }
        assert_eq!(engine.store().record_count(), 0);
        assert_eq!(engine.store().identity("A").unwrap().embedding.values, vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_no_face_writes_nothing() {
        let engine = engine(ScriptedEmbedder::default().with(b"blank", None));

        for id in ["A", "B", "C"] {
            let outcome = engine.resolve_at(attempt(id, b"blank"), at(1, (9, 0, 0))).await.unwrap();
            assert_eq!(outcome, Outcome::NoFaceDetected);
        }
        assert_eq!(engine.enrolled_count().await.unwrap(), 0);
        assert_eq!(engine.store().record_count(), 0);
    }

    #[tokio::test]
    async fn test_reenrollment_refreshes_embedding_each_day() {
        let engine = engine(
            ScriptedEmbedder::default()
                .with(b"day1", Some(vec![0.1, 0.2]))
                .with(b"day2", Some(vec![0.2, 0.3])),
        );

        let d1 = engine.resolve_at(attempt("A", b"day1"), at(1, (9, 0, 0))).await.unwrap();
        let d2 = engine.resolve_at(attempt("A", b"day2"), at(2, (9, 0, 0))).await.unwrap();

        assert!(matches!(d1, Outcome::Recorded(_)));
        assert!(matches!(d2, Outcome::Recorded(_)));
        assert_eq!(engine.store().identity("A").unwrap().embedding.values, vec![0.2, 0.3]);

        let recent = engine.recent(10).await.unwrap();
        let dates: Vec<_> = recent.iter().map(|r| r.date.to_string()).collect();
        assert_eq!(dates, vec!["2024-01-02", "2024-01-01"]);
    }

    #[tokio::test]
    async fn test_already_marked_keeps_stored_embedding() {
        let engine = engine(
            ScriptedEmbedder::default()
                .with(b"morning", Some(vec![0.1, 0.2]))
                .with(b"evening", Some(vec![0.3, 0.2])),
        );

        engine.resolve_at(attempt("A", b"morning"), at(1, (9, 0, 0))).await.unwrap();
        let outcome = engine.resolve_at(attempt("A", b"evening"), at(1, (18, 0, 0))).await.unwrap();

        assert_eq!(outcome, Outcome::AlreadyMarked);
        assert_eq!(engine.store().identity("A").unwrap().embedding.values, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_lost_race_is_already_marked() {
        let engine = engine(
            ScriptedEmbedder::default()
                .with(b"first", Some(vec![0.1, 0.2]))
                .with(b"second", Some(vec![0.3, 0.2])),
        );

        engine.resolve_at(attempt("A", b"first"), at(1, (9, 0, 0))).await.unwrap();
        engine.store().stale_reads.store(true, Ordering::SeqCst);

        let outcome = engine.resolve_at(attempt("A", b"second"), at(1, (9, 0, 1))).await.unwrap();
        assert_eq!(outcome, Outcome::AlreadyMarked);
        assert_eq!(engine.store().record_count(), 1);
        assert_eq!(engine.store().identity("A").unwrap().embedding.values, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_embedder_timeout_writes_nothing() {
        let mut embedder = ScriptedEmbedder::default().with(b"slow", Some(vec![0.1, 0.2]));
        embedder.delay = Some(Duration::from_secs(5));
        let settings = EngineSettings {
            embed_timeout: Duration::from_millis(20),
            ..EngineSettings::default()
        };
        let engine = ResolutionEngine::new(MemoryStore::default(), embedder, settings);

        let err = engine
            .resolve_at(attempt("A", b"slow"), at(1, (9, 0, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbedderTimeout(_)));
        assert_eq!(engine.enrolled_count().await.unwrap(), 0);
        assert_eq!(engine.store().record_count(), 0);
    }

    #[tokio::test]
    async fn test_embedder_failure_is_error() {
        let engine = engine(ScriptedEmbedder::default());
        let err = engine
            .resolve_at(attempt("A", b"unknown"), at(1, (9, 0, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Embedder(EmbedError::Backend(_))));
    }

    #[tokio::test]
    async fn test_recorded_time_has_second_precision() {
        let engine = engine(ScriptedEmbedder::default().with(b"a", Some(vec![0.1])));
        let now = at(1, (9, 15, 30)) + chrono::Duration::milliseconds(750);

        let outcome = engine.resolve_at(attempt("A", b"a"), now).await.unwrap();
        match outcome {
            Outcome::Recorded(record) => {
                assert_eq!(record.time, NaiveTime::from_hms_opt(9, 15, 30).unwrap())
            }
            other => panic!("expected Recorded, got {other:?}"),
        }
    }

    #[test]
    fn test_attempt_validation() {
        assert_eq!(
            AttendanceAttempt::new("  ", "Alice", vec![1], None).unwrap_err(),
            ValidationError::MissingField("identity_id")
        );
        assert_eq!(
            AttendanceAttempt::new("A", "", vec![1], None).unwrap_err(),
            ValidationError::MissingField("display_name")
        );
        assert_eq!(
            AttendanceAttempt::new("A", "Alice", vec![], None).unwrap_err(),
            ValidationError::MissingField("image")
        );
        assert!(matches!(
            AttendanceAttempt::new(&"x".repeat(200), "Alice", vec![1], None),
            Err(ValidationError::TooLong { field: "identity_id", .. })
        ));

        let ok = AttendanceAttempt::new(" A1 ", " Alice ", vec![1], None).unwrap();
        assert_eq!(ok.identity_id, "A1");
        assert_eq!(ok.display_name, "Alice");
    }
}
