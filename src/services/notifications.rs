use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::notification::Notification,
    state::AppState,
};

/// How many notifications a listing returns.
pub const LIST_LIMIT: i64 = 50;

/// The user's latest notifications, newest first.
pub async fn list(state: &AppState, user_id: Uuid) -> Result<Vec<Notification>> {
    state.notifications.list_for_user(user_id, LIST_LIMIT).await
}

pub async fn unread_count(state: &AppState, user_id: Uuid) -> Result<i64> {
    state.notifications.unread_count(user_id).await
}

/// Marks one notification as read. Someone else's notification is reported as missing.
pub async fn mark_read(state: &AppState, id: Uuid, user_id: Uuid) -> Result<Notification> {
    state
        .notifications
        .mark_read(id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))
}

/// Marks all of the user's notifications as read and returns how many changed.
pub async fn mark_all_read(state: &AppState, user_id: Uuid) -> Result<u64> {
    let updated = state.notifications.mark_all_read(user_id).await?;
    tracing::debug!("Marked {} notifications read for {}", updated, user_id);
    Ok(updated)
}
