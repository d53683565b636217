use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use super::{EventStream, RealtimeEvent, RoomBroadcaster};
use crate::error::Result;

const ROOM_CAPACITY: usize = 64;

/// In-process rooms backed by one `broadcast` channel per user.
///
/// Used when no Redis URL is configured, which limits delivery to sockets
/// connected to this instance.
#[derive(Clone, Default)]
pub struct LocalBroadcaster {
    rooms: Arc<DashMap<Uuid, broadcast::Sender<RealtimeEvent>>>,
}

impl LocalBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn join(&self, room: Uuid) -> Subscription {
        // subscribe under the entry lock so a leaving subscriber cannot prune the room in between
        let receiver = self
            .rooms
            .entry(room)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe();

        Subscription {
            room,
            rooms: Arc::clone(&self.rooms),
            receiver: Some(receiver),
        }
    }
}

/// One subscriber's handle on a room. The room is dropped with its last subscriber.
struct Subscription {
    room: Uuid,
    rooms: Arc<DashMap<Uuid, broadcast::Sender<RealtimeEvent>>>,
    receiver: Option<broadcast::Receiver<RealtimeEvent>>,
}

impl Subscription {
    async fn recv(&mut self) -> std::result::Result<RealtimeEvent, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        if self
            .rooms
            .remove_if(&self.room, |_, sender| sender.receiver_count() == 0)
            .is_some()
        {
            tracing::debug!("🧹 Room {} closed", self.room);
        }
    }
}

#[async_trait]
impl RoomBroadcaster for LocalBroadcaster {
    async fn publish(&self, room: Uuid, event: &RealtimeEvent) -> Result<()> {
        let Some(sender) = self.rooms.get(&room).map(|entry| entry.value().clone()) else {
            tracing::debug!("📭 No subscribers in room {}", room);
            return Ok(());
        };

        if sender.send(event.clone()).is_err() {
            // every receiver is gone
            self.rooms.remove_if(&room, |_, s| s.receiver_count() == 0);
        }
        Ok(())
    }

    async fn subscribe(&self, room: Uuid) -> Result<EventStream> {
        let subscription = self.join(room);

        let stream = futures::stream::unfold(subscription, |mut subscription| async move {
            loop {
                match subscription.recv().await {
                    Ok(event) => return Some((event, subscription)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "⚠️ Room {} subscriber lagged, {} events skipped",
                            subscription.room,
                            skipped
                        );
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_events_for_their_room_only() {
        let broadcaster = LocalBroadcaster::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut alice_events = broadcaster.subscribe(alice).await.unwrap();
        let mut bob_events = broadcaster.subscribe(bob).await.unwrap();

        let event = RealtimeEvent::new("session_scheduled", json!({ "id": 1 }));
        broadcaster.publish(alice, &event).await.unwrap();

        assert_eq!(alice_events.next().await, Some(event));

        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), bob_events.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn publishing_to_an_empty_room_is_not_an_error() {
        let broadcaster = LocalBroadcaster::new();
        let event = RealtimeEvent::new("notification", json!({}));
        assert!(broadcaster.publish(Uuid::new_v4(), &event).await.is_ok());
    }

    #[tokio::test]
    async fn room_is_released_with_its_last_subscriber() {
        let broadcaster = LocalBroadcaster::new();
        let room = Uuid::new_v4();

        let first = broadcaster.subscribe(room).await.unwrap();
        let mut second = broadcaster.subscribe(room).await.unwrap();
        assert_eq!(broadcaster.rooms.len(), 1);

        drop(first);
        assert!(broadcaster.rooms.contains_key(&room));

        let event = RealtimeEvent::new("notification", json!({ "n": 1 }));
        broadcaster.publish(room, &event).await.unwrap();
        assert_eq!(second.next().await, Some(event));

        drop(second);
        assert!(broadcaster.rooms.is_empty());
    }
}
