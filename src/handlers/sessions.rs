use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    response::Response,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, de};
use uuid::Uuid;

use crate::{
    error::Result,
    handlers::response::{Envelope, message_only},
    models::{
        session::{NewSession, SessionChanges, SessionFilter},
        user::AuthUser,
    },
    services::sessions as session_service,
    state::AppState,
};

/// The request payload for booking a session.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub client_id: Uuid,
    /// Only read for admins. Trainers always book for themselves.
    pub trainer_id: Option<Uuid>,
    #[serde(alias = "date")]
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub notes: Option<String>,
}

/// The query parameters for listing sessions.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    pub trainer_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    #[serde(default, alias = "startDate", deserialize_with = "lenient_instant")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, alias = "endDate", deserialize_with = "lenient_instant")]
    pub to: Option<DateTime<Utc>>,
}

/// Reads an RFC 3339 instant or a bare `YYYY-MM-DD` date, taken as midnight UTC.
fn lenient_instant<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    if let Ok(instant) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(instant.to_utc()));
    }
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Some(midnight.and_utc()))
        .ok_or_else(|| de::Error::custom(format!("invalid date '{}': expected RFC 3339 or YYYY-MM-DD", raw)))
}

/// The query parameters for session statistics.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub client_id: Option<Uuid>,
}

/// Books a session.
#[axum::debug_handler]
pub async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: std::result::Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = payload?;
    let trainer_id = session_service::booking_trainer(&user, req.trainer_id)?;

    let session = session_service::create(
        &state,
        NewSession {
            trainer_id,
            client_id: req.client_id,
            start_time: req.start_time,
            end_time: req.end_time,
            notes: req.notes,
        },
    )
    .await?;

    Envelope::new(session)
        .message("Session created successfully")
        .created()
}

/// Lists the caller's sessions.
#[axum::debug_handler]
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    query: std::result::Result<Query<ListSessionsQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let filter = SessionFilter {
        trainer_id: query.trainer_id,
        client_id: query.client_id,
        from: query.from,
        to: query.to,
    };

    let sessions = session_service::list(&state, &user, filter).await?;
    Envelope::new(sessions).message("Sessions retrieved").ok()
}

#[axum::debug_handler]
pub async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Response> {
    let Path(id) = id?;
    let session = session_service::get_by_id(&state, &user, id).await?;
    Envelope::new(session).ok()
}

/// Applies a partial update to a session.
#[axum::debug_handler]
pub async fn update_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    id: std::result::Result<Path<Uuid>, PathRejection>,
    payload: std::result::Result<Json<SessionChanges>, JsonRejection>,
) -> Result<Response> {
    let Path(id) = id?;
    let Json(changes) = payload?;

    let session = session_service::update(&state, &user, id, changes).await?;
    Envelope::new(session).message("Session updated").ok()
}

#[axum::debug_handler]
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Response> {
    let Path(id) = id?;
    session_service::delete(&state, &user, id).await?;
    message_only("Session deleted")
}

/// Weekly and monthly session counts for the caller, or for one client.
#[axum::debug_handler]
pub async fn session_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    query: std::result::Result<Query<StatsQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let (subject, role) = session_service::stats_subject(&user, query.client_id)?;

    let stats = session_service::stats(&state, subject, role).await?;
    Envelope::new(stats).ok()
}
