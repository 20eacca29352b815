//! Bridges [`QuizStore`] and [`SecureStore`].
//!
//! Writes: a background task follows the store's change feed and seals the
//! latest `{session, currentStep}` projection under one durable key with a
//! sliding TTL. Intermediate snapshots may be coalesced; the last one always
//! lands.
//!
//! Reads: a single load at startup, validated against the projection shape,
//! after which the [`HydrationGate`] opens whatever the outcome.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{StoreError, ValidationError};
use crate::hydration::HydrationGate;
use crate::quiz_store::{QuizStore, Snapshot};
use crate::secure_store::{ttl, GetOptions, SecureStore, SetOptions, Shape, Validator};
use crate::session::PersistedQuiz;

pub const DEFAULT_SESSION_KEY: &str = "quiz-keep-session";
pub const SESSION_TTL_MS: i64 = ttl::ONE_WEEK;

/// Structural check for a stored projection, run before it is trusted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjectionShape;

impl Validator for ProjectionShape {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::new("projection is not an object"))?;

        match object.get("currentStep") {
            None => {}
            Some(step) if step.as_u64().is_some() => {}
            Some(_) => return Err(ValidationError::new("currentStep must be a non-negative integer")),
        }

        if let Some(session) = object.get("session").filter(|s| !s.is_null()) {
            let session_id = session
                .get("sessionId")
                .and_then(Value::as_str)
                .ok_or_else(|| ValidationError::new("session.sessionId missing"))?;
            Uuid::parse_str(session_id)
                .map_err(|e| ValidationError::new(format!("session.sessionId: {e}")))?;

            let answers = session
                .get("answers")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let mut seen = HashSet::new();
            for answer in answers {
                let question_id = answer
                    .get("questionId")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| ValidationError::new("answer without questionId"))?;
                if !seen.insert(question_id) {
                    return Err(ValidationError::new(format!(
                        "question {question_id} answered twice"
                    )));
                }
            }
        }

        Shape::<PersistedQuiz>::new().validate(value)
    }
}

pub struct PersistenceAdapter {
    store: Arc<SecureStore>,
    session_key: String,
    ttl_ms: i64,
    gate: HydrationGate,
    written: watch::Sender<u64>,
    attached: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl PersistenceAdapter {
    pub fn new(store: Arc<SecureStore>) -> Self {
        let (written, _) = watch::channel(0);
        Self {
            store,
            session_key: DEFAULT_SESSION_KEY.to_string(),
            ttl_ms: SESSION_TTL_MS,
            gate: HydrationGate::new(),
            written,
            attached: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    pub fn with_ttl(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn store(&self) -> &SecureStore {
        &self.store
    }

    pub fn gate(&self) -> HydrationGate {
        self.gate.clone()
    }

    /// Most recent capacity failure, cleared by the next successful write.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Seal and store one projection. Uninitialized projections are skipped.
    pub fn persist(&self, projection: &PersistedQuiz) -> Result<bool, StoreError> {
        if projection.session.is_none() {
            return Ok(false);
        }
        self.store.set(
            &self.session_key,
            projection,
            SetOptions::with_ttl(self.ttl_ms).encrypted(),
        )?;
        Ok(true)
    }

    /// Read back the stored projection. Anything stale, tampered with or
    /// malformed is evicted and reads as `None`.
    pub fn load(&self) -> Option<PersistedQuiz> {
        let shape = ProjectionShape;
        self.store
            .get(&self.session_key, GetOptions::decrypted().validated(&shape))
    }

    /// First load. Opens the gate on every path, including a panicked read.
    pub async fn hydrate(self: &Arc<Self>, quiz: &QuizStore) -> bool {
        let adapter = Arc::clone(self);
        let loaded = tokio::task::spawn_blocking(move || adapter.load()).await;
        let restored = match loaded {
            Ok(Some(projection)) => {
                let step = projection.current_step;
                let restored = quiz.hydrate(projection);
                info!(key = %self.session_key, step, "restored saved session");
                restored
            }
            Ok(None) => {
                info!(key = %self.session_key, "no saved session");
                false
            }
            Err(err) => {
                warn!(error = %err, "session load task failed");
                false
            }
        };
        self.gate.mark_ready();
        restored
    }

    /// Start the background writer for `quiz`. Changes published before this
    /// call are considered already persisted.
    pub fn attach(self: &Arc<Self>, quiz: &QuizStore) -> JoinHandle<()> {
        let mut changes = quiz.subscribe();
        let start = changes.borrow_and_update().revision;
        self.written.send_replace(start);
        self.attached.store(true, Ordering::SeqCst);

        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let snapshot = changes.borrow_and_update().clone();
                adapter.write(snapshot).await;
            }
            debug!("quiz store dropped, persistence writer stopping");
        })
    }

    async fn write(self: &Arc<Self>, snapshot: Snapshot) {
        let revision = snapshot.revision;
        let adapter = Arc::clone(self);
        let result =
            tokio::task::spawn_blocking(move || adapter.persist(&snapshot.projection)).await;
        match result {
            Ok(Ok(stored)) => {
                if stored {
                    debug!(revision, "session persisted");
                }
                *self.last_error.lock() = None;
            }
            Ok(Err(err @ StoreError::QuotaExceeded { .. })) => {
                error!(revision, error = %err, "session not persisted");
                *self.last_error.lock() = Some(err.to_string());
            }
            Ok(Err(err)) => warn!(revision, error = %err, "session write failed"),
            Err(err) => warn!(revision, error = %err, "session write task failed"),
        }
        self.written.send_replace(revision);
    }

    /// Wait until every change published on `quiz` so far has been written
    /// or has failed. Returns at once when no writer is attached.
    pub async fn flush(&self, quiz: &QuizStore) {
        if !self.attached.load(Ordering::SeqCst) {
            return;
        }
        let target = quiz.revision();
        let mut written = self.written.subscribe();
        // `self` owns the sender, so the channel cannot close while we wait.
        let _ = written.wait_for(|done| *done >= target).await;
    }

    /// Forget everything: every entry in the namespace and the session key.
    pub fn reset(&self) -> Result<usize, StoreError> {
        let removed = self.store.clear_namespace(self.store.namespace())?;
        self.store.keys().clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, StorageBackend};
    use crate::clock::{Clock, ManualClock};
    use crate::crypto::{CryptoKeyManager, DEFAULT_KEY_SLOT};
    use crate::session::Locale;
    use crate::state_machine::{Phase, SessionStateMachine};
    use serde_json::json;

    struct Fixture {
        durable: Arc<MemoryBackend>,
        volatile: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                durable: Arc::new(MemoryBackend::new()),
                volatile: Arc::new(MemoryBackend::new()),
                clock: Arc::new(ManualClock::new(1_000)),
            }
        }

        fn adapter(&self) -> Arc<PersistenceAdapter> {
            let keys = CryptoKeyManager::new(self.volatile.clone(), DEFAULT_KEY_SLOT);
            let store = SecureStore::new(self.durable.clone(), keys, self.clock.clone());
            Arc::new(PersistenceAdapter::new(Arc::new(store)))
        }

        fn quiz(&self) -> QuizStore {
            let clock: Arc<dyn Clock> = self.clock.clone();
            QuizStore::new(SessionStateMachine::new(clock))
        }
    }

    #[test]
    fn shape_rejects_broken_projections() {
        let ok = json!({
            "session": {
                "sessionId": Uuid::new_v4().to_string(),
                "locale": "en",
                "startedAt": 1,
                "answers": [{"questionId": "q1", "value": "a", "timestamp": 1}]
            },
            "currentStep": 1
        });
        assert!(ProjectionShape.validate(&ok).is_ok());
        assert!(ProjectionShape.validate(&json!({"session": null, "currentStep": 0})).is_ok());

        let mut bad_id = ok.clone();
        bad_id["session"]["sessionId"] = json!("not-a-uuid");
        assert!(ProjectionShape.validate(&bad_id).is_err());

        let mut negative = ok.clone();
        negative["currentStep"] = json!(-1);
        assert!(ProjectionShape.validate(&negative).is_err());

        let mut twice = ok.clone();
        twice["session"]["answers"] = json!([
            {"questionId": "q1", "value": "a", "timestamp": 1},
            {"questionId": "q1", "value": "b", "timestamp": 2}
        ]);
        assert!(ProjectionShape.validate(&twice).is_err());

        let mut blank = ok;
        blank["session"]["answers"] = json!([{"questionId": "", "value": "a", "timestamp": 1}]);
        assert!(ProjectionShape.validate(&blank).is_err());
    }

    #[tokio::test]
    async fn writer_persists_every_change() {
        let fx = Fixture::new();
        let adapter = fx.adapter();
        let quiz = fx.quiz();
        let writer = adapter.attach(&quiz);

        quiz.init_session(Locale::En);
        quiz.set_answer("q1", vec!["a", "b"]);
        quiz.next_step();
        adapter.flush(&quiz).await;

        let stored = adapter.load().expect("projection stored");
        assert_eq!(stored, quiz.read(SessionStateMachine::projection));
        assert_eq!(stored.current_step, 1);

        let raw = fx.durable.get_item(DEFAULT_SESSION_KEY).unwrap().unwrap();
        assert!(!raw.contains("q1"), "projection must be sealed");
        assert!(adapter.last_error().is_none());

        drop(quiz);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn hydrate_restores_and_opens_gate() {
        let fx = Fixture::new();
        let first = fx.adapter();
        let quiz = fx.quiz();
        first.attach(&quiz);
        quiz.init_session(Locale::Fr);
        quiz.set_answer("q1", "lang-fr");
        quiz.set_email("reader@example.com");
        first.flush(&quiz).await;

        let second = fx.adapter();
        let reloaded = fx.quiz();
        let gate = second.gate();
        assert!(!gate.is_ready());
        assert!(second.hydrate(&reloaded).await);
        assert!(gate.is_ready());
        assert_eq!(reloaded.session(), quiz.session());
        assert_eq!(reloaded.phase(), Phase::Active);
    }

    #[tokio::test]
    async fn empty_store_still_opens_gate() {
        let fx = Fixture::new();
        let adapter = fx.adapter();
        let quiz = fx.quiz();
        assert!(!adapter.hydrate(&quiz).await);
        assert!(adapter.gate().is_ready());
        assert_eq!(quiz.phase(), Phase::Uninitialized);
    }

    #[tokio::test]
    async fn lost_key_strands_and_evicts_session() {
        let fx = Fixture::new();
        let adapter = fx.adapter();
        let quiz = fx.quiz();
        adapter.attach(&quiz);
        quiz.init_session(Locale::En);
        adapter.flush(&quiz).await;

        fx.volatile.remove_item(DEFAULT_KEY_SLOT).unwrap();
        let reloaded = fx.quiz();
        assert!(!fx.adapter().hydrate(&reloaded).await);
        assert_eq!(reloaded.phase(), Phase::Uninitialized);
        assert!(fx.durable.get_item(DEFAULT_SESSION_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_is_not_restored() {
        let fx = Fixture::new();
        let adapter = fx.adapter();
        let quiz = fx.quiz();
        adapter.attach(&quiz);
        quiz.init_session(Locale::En);
        adapter.flush(&quiz).await;

        fx.clock.advance(SESSION_TTL_MS);
        assert!(adapter.load().is_none());
        assert!(fx.durable.is_empty());
    }

    #[tokio::test]
    async fn quota_failure_is_surfaced() {
        let durable = Arc::new(MemoryBackend::with_quota(64));
        let volatile = Arc::new(MemoryBackend::new());
        let keys = CryptoKeyManager::new(volatile, DEFAULT_KEY_SLOT);
        let store = SecureStore::new(durable, keys, Arc::new(ManualClock::new(0)));
        let adapter = Arc::new(PersistenceAdapter::new(Arc::new(store)));
        let quiz = QuizStore::new(SessionStateMachine::new(Arc::new(ManualClock::new(0))));

        adapter.attach(&quiz);
        quiz.init_session(Locale::En);
        adapter.flush(&quiz).await;

        let message = adapter.last_error().expect("quota error recorded");
        assert!(message.contains(DEFAULT_SESSION_KEY));
        // memory state is unaffected
        assert_eq!(quiz.phase(), Phase::Active);
    }

    #[tokio::test]
    async fn flush_without_writer_returns() {
        let fx = Fixture::new();
        let adapter = fx.adapter();
        let quiz = fx.quiz();
        quiz.init_session(Locale::En);
        adapter.flush(&quiz).await;
        assert!(fx.durable.is_empty());
    }

    #[tokio::test]
    async fn reset_clears_namespace_and_key() {
        let fx = Fixture::new();
        fx.durable.set_item("other-app", "keep").unwrap();
        let adapter = fx.adapter();
        let quiz = fx.quiz();
        adapter.attach(&quiz);
        quiz.init_session(Locale::En);
        adapter.flush(&quiz).await;

        assert_eq!(adapter.reset().unwrap(), 1);
        assert!(fx.volatile.is_empty());
        assert_eq!(fx.durable.keys().unwrap(), ["other-app"]);
    }
}
