//! Per-user realtime rooms.
//!
//! Services publish through [`RoomBroadcaster`] and never see the transport.
//! Each user owns one room keyed by their ID; the WebSocket handler
//! subscribes to the caller's room and forwards every event as a JSON frame.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub mod local;
pub mod redis;

pub use local::LocalBroadcaster;
pub use self::redis::RedisBroadcaster;

/// One event delivered to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

impl RealtimeEvent {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Stream of events received by one room subscriber.
pub type EventStream = BoxStream<'static, RealtimeEvent>;

/// Publish/subscribe over per-user rooms.
#[async_trait]
pub trait RoomBroadcaster: Send + Sync {
    /// Delivers `event` to every current subscriber of `room`.
    async fn publish(&self, room: Uuid, event: &RealtimeEvent) -> Result<()>;

    /// Joins `room`. The stream ends when the transport goes away.
    async fn subscribe(&self, room: Uuid) -> Result<EventStream>;
}

/// Pub/sub channel name for a room.
pub fn room_channel(room: Uuid) -> String {
    format!("room:{}", room)
}
