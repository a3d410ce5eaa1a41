//! Live fan-out of session entries to subscribers
//!
//! Each subscriber owns a bounded channel drained by its own task (for
//! example a WebSocket writer). Publishing only enqueues with `try_send`,
//! so a slow or vanished consumer can never stall the publisher: a
//! subscriber whose channel is full or closed is dropped on the spot.
//!
//! Replay and registration happen under the session lock, which is the
//! same lock every publish takes. A late joiner therefore sees the
//! buffered history followed by the live tail with no gap and no
//! duplicate.
//!
//! Fan-out therefore runs with the session lock held. Each enqueue is a
//! `try_send` that never waits, so the lock is held for a bounded, short
//! time; the actual socket writes happen later in each subscriber's task.

use crate::error::{AuditError, Result};
use crate::registry::{LiveState, SessionRegistry};
use crate::types::{AuditEntry, SessionStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default per-subscriber channel capacity
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

/// Identifies one subscriber connection
pub type SubscriberId = u64;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Message delivered to a subscriber's channel
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Buffered history at subscribe time, ascending; always sent first
    Replay {
        session_id: String,
        entries: Vec<AuditEntry>,
    },

    /// One live entry
    Entry(AuditEntry),

    /// Terminal notice; nothing follows for this session
    Completed {
        session_id: String,
        status: SessionStatus,
        total_entries: u64,
    },
}

impl Delivery {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Replay { session_id, .. } | Self::Completed { session_id, .. } => session_id,
            Self::Entry(entry) => &entry.session_id,
        }
    }
}

/// Sending half of a subscriber connection
///
/// Cheap to clone; the broadcaster keeps one clone per session the
/// subscriber is registered with.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Delivery>,
}

impl Subscriber {
    /// Create a subscriber and the receiver its delivery task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    fn try_deliver(&self, delivery: Delivery) -> std::result::Result<(), TrySendError<Delivery>> {
        self.tx.try_send(delivery)
    }
}

/// The subscribers registered with one session
#[derive(Debug, Default)]
pub struct SubscriberSet {
    subscribers: HashMap<SubscriberId, Subscriber>,
}

impl SubscriberSet {
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    fn insert(&mut self, subscriber: Subscriber) {
        self.subscribers.insert(subscriber.id, subscriber);
    }

    fn remove(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    fn clear(&mut self) {
        self.subscribers.clear();
    }

    /// Enqueue to every subscriber, dropping any that cannot accept it
    fn fan_out(&mut self, delivery: &Delivery) {
        self.subscribers
            .retain(|id, subscriber| match subscriber.try_deliver(delivery.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        session_id = %delivery.session_id(),
                        subscriber = id,
                        "Subscriber saturated, dropping"
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        session_id = %delivery.session_id(),
                        subscriber = id,
                        "Subscriber disconnected, dropping"
                    );
                    false
                }
            });
    }
}

/// Per-session subscriber management and ordered fan-out
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Replay buffered entries to `subscriber`, then register it for live delivery
    ///
    /// Fails with `UnknownSession` when the session is not live (never
    /// started, evicted, or already terminally notified), and with
    /// `Transport` when the replay cannot be enqueued; in both cases the
    /// subscriber is not registered.
    pub async fn subscribe(&self, session_id: &str, subscriber: Subscriber) -> Result<()> {
        let active = self
            .registry
            .get(session_id)
            .ok_or_else(|| AuditError::UnknownSession(session_id.to_string()))?;

        let mut live = active.lock().await;
        if live.is_notified() {
            return Err(AuditError::UnknownSession(session_id.to_string()));
        }

        let replay = Delivery::Replay {
            session_id: session_id.to_string(),
            entries: live.entries().to_vec(),
        };
        subscriber.try_deliver(replay).map_err(|e| {
            AuditError::Transport(format!(
                "Replay to subscriber {} failed: {}",
                subscriber.id(),
                e
            ))
        })?;

        tracing::debug!(
            session_id = %session_id,
            subscriber = subscriber.id(),
            replayed = live.entries().len(),
            "Subscriber attached"
        );
        live.subscribers_mut().insert(subscriber);
        Ok(())
    }

    /// Deliver an already-sequenced entry to every subscriber of its session
    ///
    /// Never fails; an unknown session is a no-op.
    pub async fn publish(&self, session_id: &str, entry: &AuditEntry) {
        let Some(active) = self.registry.get(session_id) else {
            tracing::debug!(session_id = %session_id, "Publish to inactive session ignored");
            return;
        };
        let mut live = active.lock().await;
        self.publish_locked(&mut live, entry);
    }

    /// Fan-out with the session lock already held by the caller
    pub(crate) fn publish_locked(&self, live: &mut LiveState, entry: &AuditEntry) {
        if live.is_notified() {
            return;
        }
        live.subscribers_mut().fan_out(&Delivery::Entry(entry.clone()));
    }

    /// Remove a subscriber; idempotent
    pub async fn unsubscribe(&self, session_id: &str, subscriber_id: SubscriberId) {
        let Some(active) = self.registry.get(session_id) else {
            return;
        };
        let removed = active.lock().await.subscribers_mut().remove(subscriber_id);
        if removed {
            tracing::debug!(
                session_id = %session_id,
                subscriber = subscriber_id,
                "Subscriber detached"
            );
        }
    }

    /// One-shot terminal notice, after which the subscriber set is discarded
    pub async fn notify_terminal(
        &self,
        session_id: &str,
        status: SessionStatus,
        total_entries: u64,
    ) {
        let Some(active) = self.registry.get(session_id) else {
            return;
        };
        let mut live = active.lock().await;
        if live.is_notified() {
            return;
        }

        let notice = Delivery::Completed {
            session_id: session_id.to_string(),
            status,
            total_entries,
        };
        let subscribers = live.subscribers_mut();
        subscribers.fan_out(&notice);
        subscribers.clear();
        live.mark_notified();

        tracing::debug!(session_id = %session_id, status = %status, "Terminal notice sent");
    }

    /// Number of subscribers currently registered with a session
    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        match self.registry.get(session_id) {
            Some(active) => active.lock().await.subscribers().len(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ActiveSession;
    use crate::types::{AuditSession, EventData, JobStarted};

    fn setup() -> (Broadcaster, Arc<SessionRegistry>, String) {
        let registry = Arc::new(SessionRegistry::new());
        let session = AuditSession::new("u", "reconstruction", None);
        let id = session.session_id.clone();
        registry.put(&id, Arc::new(ActiveSession::new(&session)));
        (Broadcaster::new(registry.clone()), registry, id)
    }

    fn data() -> EventData {
        EventData::JobStarted(JobStarted {
            job_type: "reconstruction".to_string(),
            target_words: None,
            input_words: None,
        })
    }

    async fn append(registry: &SessionRegistry, broadcaster: &Broadcaster, id: &str) -> AuditEntry {
        let active = registry.get(id).unwrap();
        let mut live = active.lock().await;
        let entry = live.stamp(id, data());
        broadcaster.publish_locked(&mut live, &entry);
        entry
    }

    #[tokio::test]
    async fn test_subscribe_replays_then_live() {
        let (broadcaster, registry, id) = setup();
        append(&registry, &broadcaster, &id).await;
        append(&registry, &broadcaster, &id).await;

        let (sub, mut rx) = Subscriber::channel(16);
        broadcaster.subscribe(&id, sub).await.unwrap();
        append(&registry, &broadcaster, &id).await;

        match rx.recv().await.unwrap() {
            Delivery::Replay { entries, .. } => {
                let seqs: Vec<u64> = entries.iter().map(|e| e.sequence_num).collect();
                assert_eq!(seqs, vec![1, 2]);
            }
            other => panic!("expected replay, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            Delivery::Entry(entry) => assert_eq!(entry.sequence_num, 3),
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_unknown_session() {
        let (broadcaster, _registry, _id) = setup();
        let (sub, _rx) = Subscriber::channel(4);
        let err = broadcaster.subscribe("missing", sub).await.unwrap_err();
        assert!(matches!(err, AuditError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_saturated_subscriber_dropped() {
        let (broadcaster, registry, id) = setup();
        let (slow, _slow_rx) = Subscriber::channel(1);
        let (fast, mut fast_rx) = Subscriber::channel(16);
        broadcaster.subscribe(&id, slow).await.unwrap();
        broadcaster.subscribe(&id, fast).await.unwrap();
        assert_eq!(broadcaster.subscriber_count(&id).await, 2);

        // slow subscriber's single slot is taken by its replay
        append(&registry, &broadcaster, &id).await;
        append(&registry, &broadcaster, &id).await;

        assert_eq!(broadcaster.subscriber_count(&id).await, 1);
        assert!(matches!(fast_rx.recv().await, Some(Delivery::Replay { .. })));
        assert!(matches!(fast_rx.recv().await, Some(Delivery::Entry(_))));
        assert!(matches!(fast_rx.recv().await, Some(Delivery::Entry(_))));
    }

    #[tokio::test]
    async fn test_closed_subscriber_dropped() {
        let (broadcaster, registry, id) = setup();
        let (sub, rx) = Subscriber::channel(8);
        broadcaster.subscribe(&id, sub).await.unwrap();
        drop(rx);

        append(&registry, &broadcaster, &id).await;
        assert_eq!(broadcaster.subscriber_count(&id).await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_idempotent() {
        let (broadcaster, registry, id) = setup();
        let (sub, mut rx) = Subscriber::channel(8);
        let sub_id = sub.id();
        broadcaster.subscribe(&id, sub).await.unwrap();

        broadcaster.unsubscribe(&id, sub_id).await;
        broadcaster.unsubscribe(&id, sub_id).await;
        broadcaster.unsubscribe("missing", sub_id).await;

        append(&registry, &broadcaster, &id).await;
        assert!(matches!(rx.recv().await, Some(Delivery::Replay { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_terminal_once() {
        let (broadcaster, _registry, id) = setup();
        let (sub, mut rx) = Subscriber::channel(8);
        broadcaster.subscribe(&id, sub).await.unwrap();

        broadcaster.notify_terminal(&id, SessionStatus::Completed, 3).await;
        broadcaster.notify_terminal(&id, SessionStatus::Completed, 3).await;

        assert!(matches!(rx.recv().await, Some(Delivery::Replay { .. })));
        assert_eq!(
            rx.recv().await,
            Some(Delivery::Completed {
                session_id: id.clone(),
                status: SessionStatus::Completed,
                total_entries: 3,
            })
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(broadcaster.subscriber_count(&id).await, 0);

        // notified sessions accept no new subscribers
        let (late, _late_rx) = Subscriber::channel(8);
        assert!(broadcaster.subscribe(&id, late).await.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_ids_unique() {
        let (a, _ra) = Subscriber::channel(1);
        let (b, _rb) = Subscriber::channel(1);
        assert_ne!(a.id(), b.id());
    }
}
