use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch},
};

use crate::{handlers, middleware_layer::auth, state::AppState};

/// Builds every route of the API.
///
/// Cross-cutting layers (trace, CORS, body limit, rate limiting) are added by
/// the binary so that tests can drive this router directly.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ws", get(handlers::realtime::connect))
        .with_state(state.clone());

    let session_routes = Router::new()
        .route(
            "/sessions",
            get(handlers::sessions::list_sessions).post(handlers::sessions::create_session),
        )
        .route("/sessions/stats", get(handlers::sessions::session_stats))
        .route(
            "/sessions/{id}",
            get(handlers::sessions::get_session)
                .patch(handlers::sessions::update_session)
                .delete(handlers::sessions::delete_session),
        )
        .route(
            "/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/notifications/unread-count",
            get(handlers::notifications::unread_count),
        )
        .route(
            "/notifications/read-all",
            patch(handlers::notifications::mark_all_read),
        )
        .route(
            "/notifications/{id}/read",
            patch(handlers::notifications::mark_read),
        )
        .route_layer(from_fn_with_state(state.clone(), auth::require_auth))
        .with_state(state.clone());

    let client_routes = Router::new()
        .route(
            "/client/trainer-change-requests",
            get(handlers::trainer_change_requests::list_own_requests)
                .post(handlers::trainer_change_requests::create_request),
        )
        .route_layer(from_fn(auth::require_client))
        .route_layer(from_fn_with_state(state.clone(), auth::require_auth))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route(
            "/admin/trainer-change-requests",
            get(handlers::trainer_change_requests::list_requests),
        )
        .route(
            "/admin/trainer-change-requests/{id}/approve",
            patch(handlers::trainer_change_requests::approve_request),
        )
        .route(
            "/admin/trainer-change-requests/{id}/reject",
            patch(handlers::trainer_change_requests::reject_request),
        )
        .route_layer(from_fn(auth::require_admin))
        .route_layer(from_fn_with_state(state.clone(), auth::require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(client_routes)
        .merge(admin_routes)
}
