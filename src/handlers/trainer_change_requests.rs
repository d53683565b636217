use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    response::Response,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::Result,
    handlers::response::Envelope,
    models::{trainer_change_request::ChangeRequestStatus, user::AuthUser},
    services::trainer_change_requests as change_request_service,
    state::AppState,
};

/// The request payload for asking to change trainer.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateChangeRequest {
    /// Omit or send `null` to ask to be unassigned.
    #[serde(default)]
    pub requested_trainer_id: Option<Uuid>,
    pub reason: String,
}

/// The query parameters for the admin listing.
#[derive(Deserialize, Debug, Default)]
pub struct ListChangeRequestsQuery {
    pub status: Option<ChangeRequestStatus>,
}

/// Files a change request for the calling client.
#[axum::debug_handler]
pub async fn create_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: std::result::Result<Json<CreateChangeRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = payload?;

    let request =
        change_request_service::create(&state, user.id, req.requested_trainer_id, req.reason).await?;
    Envelope::new(request).created()
}

/// Lists the calling client's requests.
#[axum::debug_handler]
pub async fn list_own_requests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response> {
    let requests = change_request_service::list_for_client(&state, user.id).await?;
    Envelope::new(requests).ok()
}

/// Lists all requests for admins.
#[axum::debug_handler]
pub async fn list_requests(
    State(state): State<AppState>,
    query: std::result::Result<Query<ListChangeRequestsQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let requests = change_request_service::list(&state, query.status).await?;
    Envelope::new(requests).ok()
}

#[axum::debug_handler]
pub async fn approve_request(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Response> {
    let Path(id) = id?;
    tracing::info!("🛂 Admin {} approving request {}", admin.id, id);

    let request = change_request_service::approve(&state, id, admin.id).await?;
    Envelope::new(request).message("Request approved").ok()
}

#[axum::debug_handler]
pub async fn reject_request(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Response> {
    let Path(id) = id?;
    tracing::info!("🛂 Admin {} rejecting request {}", admin.id, id);

    let request = change_request_service::reject(&state, id, admin.id).await?;
    Envelope::new(request).message("Request rejected").ok()
}
