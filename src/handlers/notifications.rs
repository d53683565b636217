use axum::{
    Extension,
    extract::{Path, State, rejection::PathRejection},
    response::Response,
};
use uuid::Uuid;

use crate::{
    error::Result,
    handlers::response::{Envelope, Pagination},
    models::user::AuthUser,
    services::notifications as notification_service,
    state::AppState,
};

#[axum::debug_handler]
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response> {
    let notifications = notification_service::list(&state, user.id).await?;
    let count = notifications.len();

    Envelope::new(notifications)
        .paginated(Pagination {
            limit: notification_service::LIST_LIMIT,
            count,
        })
        .ok()
}

#[axum::debug_handler]
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response> {
    let unread = notification_service::unread_count(&state, user.id).await?;
    Envelope::new(sonic_rs::json!({ "unreadCount": unread })).ok()
}

#[axum::debug_handler]
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Response> {
    let Path(id) = id?;
    let notification = notification_service::mark_read(&state, id, user.id).await?;
    Envelope::new(notification).ok()
}

#[axum::debug_handler]
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response> {
    let updated = notification_service::mark_all_read(&state, user.id).await?;
    Envelope::new(sonic_rs::json!({ "updated": updated })).ok()
}
