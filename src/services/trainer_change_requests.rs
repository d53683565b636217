use garde::Validate;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        trainer_change_request::{
            ChangeRequestStatus, NewTrainerChangeRequest, TrainerChangeRequest, TrainerChangeRequestView,
        },
        user::{Role, UserSummary},
    },
    repositories::trainer_change_request::{ALREADY_PROCESSED_MESSAGE, PENDING_EXISTS_MESSAGE},
    state::AppState,
};

/// Attaches user summaries to every reference of each request.
async fn expand(
    state: &AppState,
    requests: Vec<TrainerChangeRequest>,
) -> Result<Vec<TrainerChangeRequestView>> {
    let mut ids: Vec<Uuid> = requests
        .iter()
        .flat_map(|r| {
            [Some(r.client_id), r.current_trainer_id, r.requested_trainer_id, r.processed_by]
        })
        .flatten()
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let summaries: HashMap<Uuid, UserSummary> = state.users.find_summaries(&ids).await?;
    let lookup = |id: Option<Uuid>| id.and_then(|id| summaries.get(&id).cloned());

    Ok(requests
        .into_iter()
        .map(|r| TrainerChangeRequestView {
            id: r.id,
            client: lookup(Some(r.client_id)),
            current_trainer: lookup(r.current_trainer_id),
            requested_trainer: lookup(r.requested_trainer_id),
            reason: r.reason,
            status: r.status,
            processed_by: lookup(r.processed_by),
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
        .collect())
}

async fn expand_one(state: &AppState, request: TrainerChangeRequest) -> Result<TrainerChangeRequestView> {
    expand(state, vec![request])
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal("Request vanished while attaching users".to_string()))
}

async fn ensure_trainer(state: &AppState, trainer_id: Option<Uuid>) -> Result<()> {
    if let Some(id) = trainer_id {
        state
            .users
            .find_by_id_and_role(id, Role::Trainer)
            .await?
            .ok_or_else(|| AppError::NotFound("Requested trainer not found".to_string()))?;
    }
    Ok(())
}

/// Loads a request that is still awaiting a decision.
async fn find_pending(state: &AppState, id: Uuid) -> Result<TrainerChangeRequest> {
    let request = state
        .change_requests
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Request not found".to_string()))?;

    if !request.status.is_pending() {
        return Err(AppError::State(ALREADY_PROCESSED_MESSAGE.to_string()));
    }
    Ok(request)
}

/// Files a request for `client_id` to move to `requested_trainer_id`, or to no trainer.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `client_id` - The requesting client.
/// * `requested_trainer_id` - The desired trainer. `None` asks to be unassigned.
/// * `reason` - Between 5 and 500 characters.
///
/// # Returns
///
/// The pending request with its users attached.
pub async fn create(
    state: &AppState,
    client_id: Uuid,
    requested_trainer_id: Option<Uuid>,
    reason: String,
) -> Result<TrainerChangeRequestView> {
    let client = state
        .users
        .find_by_id_and_role(client_id, Role::Client)
        .await?
        .ok_or_else(|| AppError::NotFound("Client not found".to_string()))?;

    let new = NewTrainerChangeRequest {
        client_id,
        current_trainer_id: client.trainer_id,
        requested_trainer_id,
        reason: reason.trim().to_string(),
    };
    new.validate().map_err(AppError::from_report)?;

    ensure_trainer(state, requested_trainer_id).await?;

    if state.change_requests.find_pending_for_client(client_id).await?.is_some() {
        return Err(AppError::Conflict(PENDING_EXISTS_MESSAGE.to_string()));
    }

    let request = state.change_requests.insert(new).await?;
    tracing::info!("📝 Trainer change request {} filed by client {}", request.id, client_id);
    expand_one(state, request).await
}

/// Lists every request newest first, optionally only those in `status`.
pub async fn list(
    state: &AppState,
    status: Option<ChangeRequestStatus>,
) -> Result<Vec<TrainerChangeRequestView>> {
    let requests = state.change_requests.list(status).await?;
    expand(state, requests).await
}

pub async fn list_for_client(state: &AppState, client_id: Uuid) -> Result<Vec<TrainerChangeRequestView>> {
    let requests = state.change_requests.list_for_client(client_id).await?;
    expand(state, requests).await
}

/// Approves a pending request and moves the client to the requested trainer.
///
/// The requested trainer is checked again here, and once more inside the
/// approval transaction. If the trainer is gone the request stays pending.
pub async fn approve(state: &AppState, id: Uuid, admin_id: Uuid) -> Result<TrainerChangeRequestView> {
    let request = find_pending(state, id).await?;

    state
        .users
        .find_by_id_and_role(request.client_id, Role::Client)
        .await?
        .ok_or_else(|| AppError::NotFound("Client not found".to_string()))?;
    ensure_trainer(state, request.requested_trainer_id).await?;

    let approved = state
        .change_requests
        .approve_and_reassign(id, admin_id, request.client_id, request.requested_trainer_id)
        .await?;

    tracing::info!(
        "✅ Request {} approved by {}: client {} now assigned to {:?}",
        id,
        admin_id,
        approved.client_id,
        approved.requested_trainer_id
    );
    expand_one(state, approved).await
}

/// Rejects a pending request. The client's assignment is left alone.
pub async fn reject(state: &AppState, id: Uuid, admin_id: Uuid) -> Result<TrainerChangeRequestView> {
    find_pending(state, id).await?;

    let rejected = state.change_requests.reject(id, admin_id).await?;
    tracing::info!("🚫 Request {} rejected by {}", id, admin_id);
    expand_one(state, rejected).await
}
