use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, aio::ConnectionManager};
use uuid::Uuid;

use super::{EventStream, RealtimeEvent, RoomBroadcaster, room_channel};
use crate::error::{AppError, Result};

/// Rooms backed by Redis PUBLISH/SUBSCRIBE, shared by every API instance.
#[derive(Clone)]
pub struct RedisBroadcaster {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisBroadcaster {
    /// Connects the publishing side. Subscriptions open their own connection.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl RoomBroadcaster for RedisBroadcaster {
    async fn publish(&self, room: Uuid, event: &RealtimeEvent) -> Result<()> {
        let payload = sonic_rs::to_string(event)
            .map_err(|e| AppError::Internal(format!("Failed to encode realtime event: {}", e)))?;

        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(room_channel(room), payload).await?;
        tracing::debug!("📡 Published '{}' to room {} ({} receivers)", event.event, room, receivers);
        Ok(())
    }

    async fn subscribe(&self, room: Uuid) -> Result<EventStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(room_channel(room)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("⚠️ Unreadable pub/sub payload: {}", e);
                    return None;
                }
            };
            match sonic_rs::from_str::<RealtimeEvent>(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("⚠️ Malformed realtime event: {}", e);
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
