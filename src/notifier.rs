//! Best-effort, asynchronous notification dispatch.
//!
//! Callers hand work to a bounded queue and return immediately. A single
//! worker task persists notifications and pushes realtime events, retrying
//! each step a few times before giving up with an error log. Nothing here can
//! fail or slow down the request that triggered it.

use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::notification::{NewNotification, NotificationKind},
    realtime::{RealtimeEvent, RoomBroadcaster},
    repositories::notification::NotificationRepository,
};

/// Realtime event pushed to a user's room after a notification is stored.
pub const NOTIFICATION_EVENT: &str = "notification";

/// Tuning for the dispatch worker.
#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub queue_capacity: usize,
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            attempt_timeout: Duration::from_secs(2),
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// A unit of work for the dispatch worker.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Notify(NewNotification),
    Realtime { room: Uuid, event: RealtimeEvent },
}

/// Handle used by services to fire notifications without awaiting them.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Dispatch>,
}

impl Notifier {
    /// Starts the dispatch worker and returns a handle to its queue.
    pub fn spawn(
        store: Arc<dyn NotificationRepository>,
        broadcaster: Arc<dyn RoomBroadcaster>,
        settings: NotifierSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let worker = Worker {
            store,
            broadcaster,
            settings,
        };
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    /// A handle whose queue is drained by the caller instead of a worker.
    #[cfg(test)]
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<Dispatch>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queues a persisted notification for `user_id`.
    pub fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) {
        self.enqueue(Dispatch::Notify(NewNotification {
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            metadata,
        }));
    }

    /// Queues a realtime event for `room`.
    pub fn emit_realtime(&self, room: Uuid, event: &str, payload: serde_json::Value) {
        self.enqueue(Dispatch::Realtime {
            room,
            event: RealtimeEvent::new(event, payload),
        });
    }

    fn enqueue(&self, dispatch: Dispatch) {
        match self.tx.try_send(dispatch) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!("⚠️ Notification queue full, dropping {:?}", dropped);
            }
            Err(TrySendError::Closed(dropped)) => {
                tracing::warn!("⚠️ Notification worker stopped, dropping {:?}", dropped);
            }
        }
    }
}

struct Worker {
    store: Arc<dyn NotificationRepository>,
    broadcaster: Arc<dyn RoomBroadcaster>,
    settings: NotifierSettings,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Dispatch>) {
        tracing::info!("✅ Notification worker started");
        while let Some(dispatch) = rx.recv().await {
            self.handle(dispatch).await;
        }
        tracing::info!("🛑 Notification worker stopped");
    }

    async fn handle(&self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Notify(new) => {
                let stored = self
                    .attempt("persist notification", || self.store.insert(&new))
                    .await;
                let Some(notification) = stored else {
                    tracing::error!(
                        "💀 Dead letter: notification for user {} ({:?}) was not stored",
                        new.user_id,
                        new.kind
                    );
                    return;
                };

                let payload = serde_json::to_value(&notification).unwrap_or_default();
                let event = RealtimeEvent::new(NOTIFICATION_EVENT, payload);
                self.publish(new.user_id, event).await;
            }
            Dispatch::Realtime { room, event } => self.publish(room, event).await,
        }
    }

    async fn publish(&self, room: Uuid, event: RealtimeEvent) {
        let delivered = self
            .attempt("publish realtime event", || self.broadcaster.publish(room, &event))
            .await;
        if delivered.is_none() {
            tracing::error!("💀 Dead letter: event '{}' for room {} was not delivered", event.event, room);
        }
    }

    /// Runs `op` up to `max_attempts` times, each bounded by the attempt timeout.
    async fn attempt<F, Fut, T>(&self, what: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let outcome = tokio::time::timeout(self.settings.attempt_timeout, op())
                .await
                .unwrap_or_else(|_| Err(AppError::Internal("attempt timed out".to_string())));

            match outcome {
                Ok(value) => return Some(value),
                Err(e) => {
                    tracing::warn!("⚠️ Failed to {} (attempt {}/{}): {}", what, attempt, max_attempts, e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.settings.backoff * attempt).await;
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        realtime::{EventStream, LocalBroadcaster},
        repositories::memory::MemoryStore,
    };
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_settings() -> NotifierSettings {
        NotifierSettings {
            queue_capacity: 8,
            attempt_timeout: Duration::from_millis(100),
            max_attempts: 3,
            backoff: Duration::from_millis(5),
        }
    }

    /// Fails the first `failures` publishes, then succeeds.
    struct FlakyBroadcaster {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RoomBroadcaster for FlakyBroadcaster {
        async fn publish(&self, _room: Uuid, _event: &RealtimeEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(AppError::Internal("broker unavailable".to_string()))
            } else {
                Ok(())
            }
        }

        async fn subscribe(&self, _room: Uuid) -> Result<EventStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn notify_persists_and_pushes_to_the_user_room() {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(LocalBroadcaster::new());
        let user = Uuid::new_v4();
        let mut events = broadcaster.subscribe(user).await.unwrap();

        let notifier = Notifier::spawn(store.clone(), broadcaster.clone(), fast_settings());
        notifier.notify(
            user,
            NotificationKind::SessionScheduled,
            "New session",
            "You have a session tomorrow",
            json!({ "sessionId": "abc" }),
        );

        let event = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event, NOTIFICATION_EVENT);
        assert_eq!(event.payload["title"], "New session");

        let stored = store.list_for_user(user, 50).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, NotificationKind::SessionScheduled);
        assert!(!stored[0].read);
    }

    #[tokio::test]
    async fn transient_publish_failures_are_retried() {
        let broadcaster = Arc::new(FlakyBroadcaster {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let notifier = Notifier::spawn(Arc::new(MemoryStore::new()), broadcaster.clone(), fast_settings());

        notifier.emit_realtime(Uuid::new_v4(), "session_scheduled", json!({}));

        wait_for(|| broadcaster.calls.load(Ordering::SeqCst) == 3).await;
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let broadcaster = Arc::new(FlakyBroadcaster {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let notifier = Notifier::spawn(Arc::new(MemoryStore::new()), broadcaster.clone(), fast_settings());

        notifier.emit_realtime(Uuid::new_v4(), "session_scheduled", json!({}));

        wait_for(|| broadcaster.calls.load(Ordering::SeqCst) == 3).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn a_full_queue_drops_instead_of_blocking() {
        let (notifier, mut rx) = Notifier::detached(1);
        let room = Uuid::new_v4();

        notifier.emit_realtime(room, "first", json!({}));
        notifier.emit_realtime(room, "second", json!({}));

        match rx.try_recv() {
            Ok(Dispatch::Realtime { event, .. }) => assert_eq!(event.event, "first"),
            other => panic!("unexpected dispatch: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn a_stopped_worker_does_not_panic_callers() {
        let (notifier, rx) = Notifier::detached(1);
        drop(rx);
        notifier.notify(Uuid::new_v4(), NotificationKind::System, "t", "m", json!({}));
    }
}
