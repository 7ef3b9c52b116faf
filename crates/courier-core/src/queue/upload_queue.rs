//! Persistent upload queue.
//!
//! # 設計
//! - メモリ上の列（VecDeque）が配送順の正本。変更のたびに全体を `PersistentStore` に保存する
//! - 列とカウンタは 1 つの async Mutex の中にある（変更操作は直列化される）
//! - in-flight フラグだけは std Mutex。`AttemptGuard` の Drop から同期的に戻せるようにするため
//! - ロック中に await するのは Mutex 自体のみ。transport への送信はロックの外で行う

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, MutexGuard, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{AttemptState, Claim, FailureDisposition, QueuedArtifact, RetryDecision, RetryPolicy};
use crate::domain::{ArtifactId, Attributes, Payload, QueueEvent};
use crate::error::{Applied, QueueError};
use crate::impls::TracingEventSink;
use crate::observability::QueueStatus;
use crate::ports::{
    Clock, EventSink, IdGenerator, PersistentStore, StoreError, SystemClock, UlidGenerator,
};

/// Counters since the queue was opened.
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    loaded: usize,
    enqueued: u64,
    delivered: u64,
    failed_attempts: u64,
    dropped: u64,
}

struct QueueState {
    /// Delivery order. Head is attempted next.
    items: VecDeque<QueuedArtifact>,

    counters: Counters,

    /// The last persist failed; storage is behind memory.
    dirty: bool,
}

impl QueueState {
    fn position(&self, id: ArtifactId) -> Option<usize> {
        self.items.iter().position(|a| a.id == id)
    }

    fn contains(&self, id: ArtifactId) -> bool {
        self.position(id).is_some()
    }

    fn take(&mut self, id: ArtifactId) -> Option<QueuedArtifact> {
        let pos = self.position(id)?;
        self.items.remove(pos)
    }
}

/// Builder for [`UploadQueue`].
///
/// ```ignore
/// let queue = UploadQueue::builder(Arc::new(store))
///     .retry_policy(config.retry_policy())
///     .event_sink(Arc::new(TracingEventSink))
///     .open()?;
/// ```
pub struct UploadQueueBuilder {
    store: Arc<dyn PersistentStore>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    events: Arc<dyn EventSink>,
}

impl UploadQueueBuilder {
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Clock used for `enqueued_at` (and for ids, unless a generator is set).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Load the persisted state and build the queue.
    ///
    /// A missing or corrupt slot yields an empty queue. Only storage that
    /// cannot be read at all is an error.
    pub fn open(self) -> Result<UploadQueue, QueueError> {
        let loaded = self.store.load().map_err(QueueError::Load)?;

        let mut seen = HashSet::with_capacity(loaded.len());
        let mut items = VecDeque::with_capacity(loaded.len());
        for artifact in loaded {
            if !seen.insert(artifact.id) {
                warn!(artifact_id = %artifact.id, "duplicate id in persisted queue, keeping first");
                continue;
            }
            items.push_back(artifact);
        }

        info!(
            pending = items.len(),
            max_retries = self.policy.max_retries,
            "upload queue opened"
        );

        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
        };

        let counters = Counters {
            loaded: items.len(),
            ..Counters::default()
        };

        Ok(UploadQueue {
            state: Mutex::new(QueueState {
                items,
                counters,
                dirty: false,
            }),
            attempt: std::sync::Mutex::new(AttemptState::Idle),
            store: self.store,
            policy: self.policy,
            clock: self.clock,
            ids,
            events: self.events,
        })
    }
}

/// Releases a claimed attempt whose outcome is never reported.
///
/// Dropping the guard (cancelled future, panicking transport) returns the
/// queue to `Idle`; the artifact stays where it is with its retry count
/// unchanged. Call [`complete`](Self::complete) once the outcome is reported.
#[must_use = "dropping the guard releases the attempt immediately"]
pub struct AttemptGuard<'a> {
    queue: &'a UploadQueue,
    id: Option<ArtifactId>,
}

impl AttemptGuard<'_> {
    /// The outcome has been reported; nothing to release.
    pub fn complete(mut self) {
        self.id = None;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if self.queue.release_attempt(id) {
                warn!(artifact_id = %id, "attempt abandoned before its outcome was reported");
            }
        }
    }
}

/// Offline-durable queue of captured artifacts.
///
/// Producers call [`enqueue`](Self::enqueue); the sync loop claims the head
/// with [`begin_attempt`](Self::begin_attempt) and reports the outcome with
/// [`report_success`](Self::report_success) or
/// [`report_failure`](Self::report_failure). Every mutation is persisted before
/// it returns. When a persist fails the change stays applied and
/// [`QueueError::Persist`] carries what the call would have returned.
pub struct UploadQueue {
    state: Mutex<QueueState>,
    attempt: std::sync::Mutex<AttemptState>,
    store: Arc<dyn PersistentStore>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
}

impl UploadQueue {
    pub fn builder(store: Arc<dyn PersistentStore>) -> UploadQueueBuilder {
        UploadQueueBuilder {
            store,
            policy: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            ids: None,
            events: Arc::new(TracingEventSink),
        }
    }

    /// Open with the given policy and default clock, ids and event sink.
    pub fn open(store: Arc<dyn PersistentStore>, policy: RetryPolicy) -> Result<Self, QueueError> {
        Self::builder(store).retry_policy(policy).open()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Append a new artifact to the tail and persist.
    ///
    /// Never touches the network. If persisting fails the artifact stays
    /// queued and is written by the next successful persist; the error
    /// carries its id (`QueueError::enqueued_id`) so the caller must not
    /// enqueue the same capture again.
    pub async fn enqueue(
        &self,
        payload: impl Into<Payload>,
        attributes: Attributes,
    ) -> Result<ArtifactId, QueueError> {
        let payload = payload.into();
        let mut state = self.state.lock().await;

        let mut id = self.ids.generate_artifact_id();
        while state.contains(id) {
            id = self.ids.generate_artifact_id();
        }

        let size = payload.len();
        state
            .items
            .push_back(QueuedArtifact::new(id, payload, attributes, self.clock.now()));
        state.counters.enqueued += 1;

        let pending = state.items.len();
        debug!(artifact_id = %id, size, pending, "artifact enqueued");
        self.events.emit(&QueueEvent::Enqueued {
            artifact_id: id,
            pending,
        });

        self.persist(&mut state)
            .map_err(|source| QueueError::Persist {
                source,
                applied: Applied::Enqueued(id),
            })?;
        Ok(id)
    }

    /// Head of the queue, without removing it.
    pub async fn peek_next(&self) -> Option<QueuedArtifact> {
        self.state.lock().await.items.front().cloned()
    }

    /// Claim the head for a delivery attempt.
    ///
    /// Refuses while another attempt is outstanding. On `Ready` the queue is
    /// `Attempting` until the outcome for that id is reported or the attempt
    /// is released (see [`guard_attempt`](Self::guard_attempt)).
    pub async fn begin_attempt(&self) -> Claim {
        let state = self.state.lock().await;
        let mut attempt = self.attempt();
        if let Some(in_flight) = attempt.in_flight() {
            return Claim::Busy(in_flight);
        }
        let Some(head) = state.items.front().cloned() else {
            return Claim::Empty;
        };
        *attempt = AttemptState::Attempting(head.id);
        Claim::Ready(head)
    }

    /// Guard that releases the attempt on `id` unless completed.
    pub fn guard_attempt(&self, id: ArtifactId) -> AttemptGuard<'_> {
        AttemptGuard {
            queue: self,
            id: Some(id),
        }
    }

    /// Leave `Attempting` without recording an outcome.
    ///
    /// Returns `false` if `id` was not the attempt in flight.
    pub fn release_attempt(&self, id: ArtifactId) -> bool {
        let mut attempt = self.attempt();
        if attempt.in_flight() == Some(id) {
            *attempt = AttemptState::Idle;
            true
        } else {
            false
        }
    }

    /// Remove a delivered artifact and persist.
    ///
    /// Returns `false` (and changes nothing) when the id is not queued, e.g.
    /// a duplicate report.
    pub async fn report_success(&self, id: ArtifactId) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        self.release_attempt(id);

        if state.take(id).is_none() {
            info!(artifact_id = %id, "success reported for artifact that is no longer queued");
            return Ok(false);
        }
        state.counters.delivered += 1;

        let pending = state.items.len();
        info!(artifact_id = %id, pending, "artifact delivered");
        self.events.emit(&QueueEvent::Delivered {
            artifact_id: id,
            pending,
        });

        self.persist(&mut state)
            .map_err(|source| QueueError::Persist {
                source,
                applied: Applied::Delivered(true),
            })?;
        Ok(true)
    }

    /// Record a failed attempt: requeue at the tail or drop, then persist.
    pub async fn report_failure(&self, id: ArtifactId) -> Result<FailureDisposition, QueueError> {
        let mut state = self.state.lock().await;
        self.release_attempt(id);

        let Some(mut artifact) = state.take(id) else {
            info!(artifact_id = %id, "failure reported for artifact that is no longer queued");
            return Ok(FailureDisposition::NotFound);
        };
        state.counters.failed_attempts += 1;

        let disposition = match self.policy.decide(artifact.retry_count) {
            RetryDecision::Requeue { retry_count } => {
                artifact.retry_count = retry_count;
                state.items.push_back(artifact);

                let pending = state.items.len();
                info!(artifact_id = %id, retry_count, pending, "delivery failed, moved to tail");
                self.events.emit(&QueueEvent::Requeued {
                    artifact_id: id,
                    retry_count,
                    pending,
                });
                FailureDisposition::Requeued { retry_count }
            }
            RetryDecision::Drop { attempts } => {
                state.counters.dropped += 1;

                let pending = state.items.len();
                warn!(
                    artifact_id = %id,
                    attempts,
                    enqueued_at = %artifact.enqueued_at,
                    pending,
                    "artifact dropped after exhausting retries"
                );
                self.events.emit(&QueueEvent::Dropped {
                    artifact_id: id,
                    attempts,
                    enqueued_at: artifact.enqueued_at,
                    pending,
                });
                FailureDisposition::Dropped(artifact)
            }
        };

        match self.persist(&mut state) {
            Ok(()) => Ok(disposition),
            Err(source) => Err(QueueError::Persist {
                source,
                applied: Applied::Failure(disposition),
            }),
        }
    }

    /// Zero every queued artifact's retry count, keeping order, and persist.
    ///
    /// Returns how many artifacts had a non-zero count. Dropped artifacts are
    /// gone and are not affected.
    pub async fn reset_retries(&self) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;

        let mut reset = 0;
        for artifact in state.items.iter_mut() {
            if artifact.retry_count > 0 {
                artifact.retry_count = 0;
                reset += 1;
            }
        }

        info!(reset, pending = state.items.len(), "retry counts reset");
        self.events
            .emit(&QueueEvent::RetriesReset { artifacts: reset });

        self.persist(&mut state)
            .map_err(|source| QueueError::Persist {
                source,
                applied: Applied::RetriesReset(reset),
            })?;
        Ok(reset)
    }

    /// Persist the current state again, e.g. after a failed write.
    pub async fn flush(&self) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        self.persist(&mut state)
            .map_err(|source| QueueError::Persist {
                source,
                applied: Applied::Nothing,
            })
    }

    pub async fn size(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    /// True exactly while a claimed attempt is neither reported nor released.
    pub async fn is_syncing(&self) -> bool {
        self.attempt().is_attempting()
    }

    /// True while storage is behind memory after a failed persist.
    pub async fn needs_persist(&self) -> bool {
        self.state.lock().await.dirty
    }

    /// Copy of the queue in delivery order (for a pending-uploads view).
    pub async fn snapshot(&self) -> Vec<QueuedArtifact> {
        self.state.lock().await.items.iter().cloned().collect()
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        let c = state.counters;
        QueueStatus {
            pending: state.items.len(),
            is_syncing: self.attempt().is_attempting(),
            is_online: None,
            needs_persist: state.dirty,
            loaded: c.loaded,
            enqueued: c.enqueued,
            delivered: c.delivered,
            failed_attempts: c.failed_attempts,
            dropped: c.dropped,
        }
    }

    fn attempt(&self) -> MutexGuard<'_, AttemptState> {
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &mut QueueState) -> Result<(), StoreError> {
        match self.store.save(state.items.make_contiguous()) {
            Ok(()) => {
                if state.dirty {
                    info!(pending = state.items.len(), "queue persisted after earlier failure");
                }
                state.dirty = false;
                Ok(())
            }
            Err(err) => {
                state.dirty = true;
                error!(error = %err, pending = state.items.len(), "failed to persist queue");
                self.events.emit(&QueueEvent::PersistFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{MemoryEventSink, MemoryStore};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    struct Harness {
        queue: UploadQueue,
        store: Arc<MemoryStore>,
        events: Arc<MemoryEventSink>,
    }

    fn harness(max_retries: u32) -> Harness {
        harness_with_store(Arc::new(MemoryStore::new()), max_retries)
    }

    fn harness_with_store(store: Arc<MemoryStore>, max_retries: u32) -> Harness {
        let events = Arc::new(MemoryEventSink::new());
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap());
        let queue = UploadQueue::builder(store.clone())
            .retry_policy(RetryPolicy::new(max_retries))
            .clock(Arc::new(clock))
            .event_sink(events.clone())
            .open()
            .unwrap();
        Harness {
            queue,
            store,
            events,
        }
    }

    fn owner(user: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("user_id".to_string(), user.to_string());
        attrs.insert("store_id".to_string(), "STORE-7".to_string());
        attrs
    }

    async fn claim(queue: &UploadQueue) -> QueuedArtifact {
        match queue.begin_attempt().await {
            Claim::Ready(artifact) => artifact,
            other => panic!("expected a claim, got {other:?}"),
        }
    }

    async fn assert_persisted_matches(h: &Harness) {
        assert_eq!(h.store.load().unwrap(), h.queue.snapshot().await);
    }

    #[tokio::test]
    async fn enqueue_appends_and_persists() {
        let h = harness(3);

        let id = h.queue.enqueue("photo-1", owner("u1")).await.unwrap();

        let snapshot = h.queue.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].retry_count, 0);
        assert_eq!(snapshot[0].attribute("user_id"), Some("u1"));
        assert_eq!(
            snapshot[0].enqueued_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
        );
        assert_persisted_matches(&h).await;
        assert_eq!(h.events.names(), vec!["enqueued"]);
    }

    #[tokio::test]
    async fn peek_next_does_not_remove() {
        let h = harness(3);
        assert!(h.queue.peek_next().await.is_none());

        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();
        h.queue.enqueue("b", Attributes::new()).await.unwrap();

        assert_eq!(h.queue.peek_next().await.unwrap().id, a);
        assert_eq!(h.queue.peek_next().await.unwrap().id, a);
        assert_eq!(h.queue.size().await, 2);
    }

    #[tokio::test]
    async fn report_success_twice_is_a_noop() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();
        h.queue.enqueue("b", Attributes::new()).await.unwrap();

        assert!(h.queue.report_success(a).await.unwrap());
        assert_eq!(h.queue.size().await, 1);

        assert!(!h.queue.report_success(a).await.unwrap());
        assert_eq!(h.queue.size().await, 1);
        assert_eq!(h.queue.status().await.delivered, 1);
    }

    #[tokio::test]
    async fn failed_head_is_demoted_behind_later_arrivals() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();
        let b = h.queue.enqueue("b", Attributes::new()).await.unwrap();

        let first = claim(&h.queue).await;
        assert_eq!(first.id, a);
        assert_eq!(
            h.queue.report_failure(a).await.unwrap(),
            FailureDisposition::Requeued { retry_count: 1 }
        );

        let second = claim(&h.queue).await;
        assert_eq!(second.id, b);
        h.queue.report_success(b).await.unwrap();

        let third = claim(&h.queue).await;
        assert_eq!(third.id, a);
        assert_eq!(third.retry_count, 1);
    }

    #[tokio::test]
    async fn artifact_is_dropped_after_max_retries_attempts() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();

        let mut attempts = 0;
        let last = loop {
            let artifact = claim(&h.queue).await;
            assert_eq!(artifact.id, a);
            attempts += 1;
            let disposition = h.queue.report_failure(a).await.unwrap();
            if !matches!(disposition, FailureDisposition::Requeued { .. }) {
                break disposition;
            }
        };

        assert_eq!(attempts, 3);
        let FailureDisposition::Dropped(dropped) = &last else {
            panic!("expected a drop, got {last:?}");
        };
        assert_eq!(dropped.id, a);
        assert_eq!(dropped.retry_count, 2);

        assert!(h.queue.is_empty().await);
        assert_eq!(h.queue.begin_attempt().await, Claim::Empty);
        assert_persisted_matches(&h).await;

        let drops = h.events.drops();
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].artifact_id(), Some(a));
        assert!(matches!(drops[0], QueueEvent::Dropped { attempts: 3, .. }));

        let status = h.queue.status().await;
        assert_eq!(status.dropped, 1);
        assert_eq!(status.failed_attempts, 3);
    }

    /// Counts `warn` records on the current thread.
    struct WarnCounter(Arc<std::sync::atomic::AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn drop_is_logged_once_with_default_sink() {
        use tracing_subscriber::layer::SubscriberExt;

        let warns = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warns.clone()));
        let _default = tracing::subscriber::set_default(subscriber);

        let queue = UploadQueue::open(Arc::new(MemoryStore::new()), RetryPolicy::new(1)).unwrap();
        let a = queue.enqueue("a", Attributes::new()).await.unwrap();
        assert!(queue.report_failure(a).await.unwrap().is_drop());

        assert_eq!(warns.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn report_failure_for_unknown_id_is_not_found() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();
        h.queue.report_success(a).await.unwrap();

        assert_eq!(
            h.queue.report_failure(a).await.unwrap(),
            FailureDisposition::NotFound
        );
        assert_eq!(h.queue.status().await.failed_attempts, 0);
    }

    #[tokio::test]
    async fn begin_attempt_refuses_while_in_flight() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();

        let claimed = claim(&h.queue).await;
        assert!(h.queue.is_syncing().await);
        assert_eq!(h.queue.begin_attempt().await, Claim::Busy(a));

        // enqueue during the attempt only touches the tail
        let b = h.queue.enqueue("b", Attributes::new()).await.unwrap();
        assert_eq!(h.queue.peek_next().await.unwrap().id, claimed.id);

        h.queue.report_success(a).await.unwrap();
        assert!(!h.queue.is_syncing().await);
        assert_eq!(claim(&h.queue).await.id, b);
    }

    #[tokio::test]
    async fn reset_retries_zeroes_counts_and_keeps_order() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();
        let b = h.queue.enqueue("b", Attributes::new()).await.unwrap();
        let c = h.queue.enqueue("c", Attributes::new()).await.unwrap();

        // a: 1 failure, b: dropped after 3, c: untouched
        h.queue.report_failure(a).await.unwrap();
        for _ in 0..3 {
            h.queue.report_failure(b).await.unwrap();
        }
        let before: Vec<_> = h.queue.snapshot().await.iter().map(|x| x.id).collect();
        assert_eq!(before, vec![c, a]);

        let reset = h.queue.reset_retries().await.unwrap();
        assert_eq!(reset, 1);

        let after = h.queue.snapshot().await;
        assert_eq!(after.iter().map(|x| x.id).collect::<Vec<_>>(), before);
        assert!(after.iter().all(|x| x.retry_count == 0));
        assert!(after.iter().all(|x| x.id != b));
        assert_persisted_matches(&h).await;
    }

    #[tokio::test]
    async fn every_mutation_is_reflected_in_the_store() {
        let h = harness(2);
        let a = h.queue.enqueue("a", owner("u1")).await.unwrap();
        assert_persisted_matches(&h).await;
        let b = h.queue.enqueue("b", owner("u2")).await.unwrap();
        assert_persisted_matches(&h).await;
        h.queue.report_failure(a).await.unwrap();
        assert_persisted_matches(&h).await;
        h.queue.reset_retries().await.unwrap();
        assert_persisted_matches(&h).await;
        h.queue.report_success(b).await.unwrap();
        assert_persisted_matches(&h).await;
        h.queue.report_failure(a).await.unwrap();
        h.queue.report_failure(a).await.unwrap();
        assert_persisted_matches(&h).await;
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn reopening_restores_order_and_retry_counts() {
        let store = Arc::new(MemoryStore::new());
        let (a, b) = {
            let h = harness_with_store(store.clone(), 3);
            let a = h.queue.enqueue("a", owner("u1")).await.unwrap();
            let b = h.queue.enqueue("b", owner("u1")).await.unwrap();
            h.queue.report_failure(a).await.unwrap();
            (a, b)
        };

        let reopened = harness_with_store(store, 3);
        let snapshot = reopened.queue.snapshot().await;
        assert_eq!(snapshot.iter().map(|x| x.id).collect::<Vec<_>>(), vec![b, a]);
        assert_eq!(snapshot[1].retry_count, 1);
        assert_eq!(snapshot[1].payload.as_bytes(), b"a");
        assert!(!reopened.queue.is_syncing().await);
        assert_eq!(reopened.queue.status().await.loaded, 2);
    }

    #[tokio::test]
    async fn corrupt_store_opens_empty() {
        let store = Arc::new(MemoryStore::with_raw("[{\"id\": 12"));
        let h = harness_with_store(store, 3);

        assert!(h.queue.is_empty().await);
        h.queue.enqueue("a", Attributes::new()).await.unwrap();
        assert_persisted_matches(&h).await;
    }

    #[tokio::test]
    async fn save_failure_is_surfaced_and_retried_on_next_mutation() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();

        h.store.set_fail_saves(true);
        let err = h.queue.enqueue("b", Attributes::new()).await.unwrap_err();
        // the capture is queued anyway and its id comes back with the error
        let b = err.enqueued_id().expect("id of the queued artifact");
        assert!(matches!(err, QueueError::Persist { .. }));
        assert!(h.queue.needs_persist().await);
        assert_eq!(h.queue.size().await, 2);
        assert_eq!(h.queue.snapshot().await[1].id, b);
        assert_eq!(h.store.load().unwrap().len(), 1);
        assert_eq!(h.events.names().last(), Some(&"persist_failed"));

        h.store.set_fail_saves(false);
        h.queue.report_success(a).await.unwrap();
        assert!(!h.queue.needs_persist().await);
        assert_persisted_matches(&h).await;
        assert_eq!(h.store.load().unwrap().len(), 1);
        assert_eq!(h.queue.peek_next().await.unwrap().id, b);
    }

    #[tokio::test]
    async fn drop_is_still_reported_when_save_fails() {
        let h = harness(1);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();
        claim(&h.queue).await;

        h.store.set_fail_saves(true);
        let err = h.queue.report_failure(a).await.unwrap_err();
        let Some(Applied::Failure(FailureDisposition::Dropped(dropped))) = err.applied() else {
            panic!("expected the drop to be carried by the error, got {err:?}");
        };
        assert_eq!(dropped.id, a);
        assert!(h.queue.is_empty().await);
        assert_eq!(h.events.drops().len(), 1);
    }

    #[tokio::test]
    async fn flush_recovers_after_failed_persist() {
        let h = harness(3);
        h.store.set_fail_saves(true);
        assert!(h.queue.enqueue("a", Attributes::new()).await.is_err());

        h.store.set_fail_saves(false);
        h.queue.flush().await.unwrap();
        assert!(!h.queue.needs_persist().await);
        assert_persisted_matches(&h).await;
    }

    #[tokio::test]
    async fn dropped_guard_releases_attempt_without_a_failure() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();
        claim(&h.queue).await;

        let guard = h.queue.guard_attempt(a);
        drop(guard);

        assert!(!h.queue.is_syncing().await);
        let again = claim(&h.queue).await;
        assert_eq!(again.id, a);
        assert_eq!(again.retry_count, 0);
        assert_eq!(h.queue.status().await.failed_attempts, 0);
    }

    #[tokio::test]
    async fn completed_guard_leaves_next_attempt_alone() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();
        claim(&h.queue).await;

        let guard = h.queue.guard_attempt(a);
        h.queue.report_failure(a).await.unwrap();
        // the same artifact is claimed again before the first guard goes away
        claim(&h.queue).await;
        guard.complete();

        assert!(h.queue.is_syncing().await);
        assert_eq!(h.queue.begin_attempt().await, Claim::Busy(a));
    }

    #[tokio::test]
    async fn release_ignores_other_ids() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();
        let b = h.queue.enqueue("b", Attributes::new()).await.unwrap();
        claim(&h.queue).await;

        assert!(!h.queue.release_attempt(b));
        assert!(h.queue.is_syncing().await);
        assert!(h.queue.release_attempt(a));
        assert!(!h.queue.is_syncing().await);
    }

    #[tokio::test]
    async fn failed_persist_still_ends_the_attempt() {
        let h = harness(3);
        let a = h.queue.enqueue("a", Attributes::new()).await.unwrap();
        claim(&h.queue).await;

        h.store.set_fail_saves(true);
        assert!(h.queue.report_failure(a).await.is_err());
        assert!(!h.queue.is_syncing().await);
    }

    #[tokio::test]
    async fn pending_equals_enqueued_minus_delivered_and_dropped() {
        let h = harness(2);
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(h.queue.enqueue(format!("p{i}"), Attributes::new()).await.unwrap());
        }

        let check = |s: QueueStatus| {
            assert_eq!(
                s.pending as u64,
                s.loaded as u64 + s.enqueued - s.delivered - s.dropped
            );
        };

        for (step, id) in ids.iter().enumerate() {
            match step % 3 {
                0 => {
                    h.queue.report_success(*id).await.unwrap();
                }
                1 => {
                    h.queue.report_failure(*id).await.unwrap();
                    h.queue.report_failure(*id).await.unwrap();
                }
                _ => {
                    h.queue.report_failure(*id).await.unwrap();
                }
            }
            check(h.queue.status().await);
            // repeated reports never change the balance
            h.queue.report_success(ids[0]).await.unwrap();
            check(h.queue.status().await);
        }

        let status = h.queue.status().await;
        assert_eq!(status.delivered, 2);
        assert_eq!(status.dropped, 2);
        assert_eq!(status.pending, 2);
    }

    #[tokio::test]
    async fn duplicate_ids_in_store_are_collapsed() {
        let store = Arc::new(MemoryStore::new());
        let a = {
            let h = harness_with_store(store.clone(), 3);
            h.queue.enqueue("a", Attributes::new()).await.unwrap()
        };
        let mut items = store.load().unwrap();
        items.push(items[0].clone());
        store.save(&items).unwrap();

        let h = harness_with_store(store, 3);
        assert_eq!(h.queue.size().await, 1);
        assert_eq!(h.queue.peek_next().await.unwrap().id, a);
    }
}
