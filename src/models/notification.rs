use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "notification_kind", rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    SessionScheduled,
    System,
}

/// A persisted, per-user notification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&Row> for Notification {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
            user_id: row.try_get("user_id").map_err(|_| AppError::MissingData("user_id".to_string()))?,
            kind: row.try_get("kind").map_err(|_| AppError::MissingData("kind".to_string()))?,
            title: row.try_get("title").map_err(|_| AppError::MissingData("title".to_string()))?,
            message: row.try_get("message").map_err(|_| AppError::MissingData("message".to_string()))?,
            read: row.try_get("read").map_err(|_| AppError::MissingData("read".to_string()))?,
            metadata: row.try_get("metadata").map_err(|_| AppError::MissingData("metadata".to_string()))?,
            created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
        })
    }
}

/// A notification waiting to be persisted.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
}
