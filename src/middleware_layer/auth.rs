use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};

use crate::{
    crypto::token::verify_access_token,
    error::{AppError, Result},
    models::user::{AuthUser, Role, UserStatus},
    state::AppState,
};

/// Extracts the bearer token from the `Authorization` header.
///
/// # Arguments
///
/// * `request` - The incoming request.
///
/// # Returns
///
/// An `Option` containing the raw token if present.
fn extract_bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Verifies a token and resolves the caller against the identity store.
///
/// The stored role wins over the role in the claims, and only active
/// accounts are let through.
pub async fn authenticate_token(state: &AppState, token: &str) -> Result<AuthUser> {
    let claims = verify_access_token(token, state.config.jwt_secret.as_str())?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::Authentication("User no longer exists".to_string()))?;

    if user.status != UserStatus::Active {
        tracing::warn!("❌ Rejected {:?} account: {}", user.status, user.id);
        return Err(AppError::Authentication("Account is not active".to_string()));
    }

    Ok(AuthUser {
        id: user.id,
        role: user.role,
    })
}

/// A middleware that requires a valid bearer token.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`, or `AppError::Authentication` rendered as 401.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    tracing::debug!("🔐 Checking authentication...");

    let token = extract_bearer_token(&request)
        .map(str::to_owned)
        .ok_or_else(|| {
            tracing::debug!("❌ No bearer token found");
            AppError::Authentication("Missing bearer token".to_string())
        })?;

    let user = authenticate_token(&state, &token).await?;
    tracing::debug!("✅ User authenticated: {} ({:?})", user.id, user.role);

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn authorize(request: &Request<Body>, allowed: &[Role]) -> Result<()> {
    request
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| AppError::Authentication("Authentication required".to_string()))?
        .require_role(allowed)
}

/// Restricts a route to admins. Must run after `require_auth`.
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response> {
    authorize(&request, &[Role::Admin])?;
    Ok(next.run(request).await)
}

/// Restricts a route to clients. Must run after `require_auth`.
pub async fn require_client(request: Request<Body>, next: Next) -> Result<Response> {
    authorize(&request, &[Role::Client])?;
    Ok(next.run(request).await)
}
