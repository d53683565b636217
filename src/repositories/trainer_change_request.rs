use async_trait::async_trait;
use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::trainer_change_request::{ChangeRequestStatus, NewTrainerChangeRequest, TrainerChangeRequest},
};

/// Message used when a client already has a request awaiting a decision.
pub const PENDING_EXISTS_MESSAGE: &str = "There is already a pending request";
/// Message used when a request has left the `pending` state.
pub const ALREADY_PROCESSED_MESSAGE: &str = "Request already processed";

const REQUEST_COLUMNS: &str = "id, client_id, current_trainer_id, requested_trainer_id, reason, \
     status, processed_by, created_at, updated_at";

/// Persistence for trainer change requests.
#[async_trait]
pub trait TrainerChangeRequestRepository: Send + Sync {
    /// Persists a request with status `pending`.
    ///
    /// Fails with `Conflict` if the client already has a pending request.
    async fn insert(&self, new: NewTrainerChangeRequest) -> Result<TrainerChangeRequest>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TrainerChangeRequest>>;

    async fn find_pending_for_client(&self, client_id: Uuid) -> Result<Option<TrainerChangeRequest>>;

    /// Lists requests newest first, optionally filtered by status.
    async fn list(&self, status: Option<ChangeRequestStatus>) -> Result<Vec<TrainerChangeRequest>>;

    /// Lists one client's requests newest first.
    async fn list_for_client(&self, client_id: Uuid) -> Result<Vec<TrainerChangeRequest>>;

    /// Approves a pending request and reassigns the client's trainer as one unit of work.
    ///
    /// Fails with `State` if the request is no longer pending and with
    /// `NotFound` if the client or the requested trainer has disappeared. On
    /// failure neither the request nor the client is modified.
    async fn approve_and_reassign(
        &self,
        id: Uuid,
        admin_id: Uuid,
        client_id: Uuid,
        new_trainer_id: Option<Uuid>,
    ) -> Result<TrainerChangeRequest>;

    /// Rejects a pending request. Fails with `State` if it is no longer pending.
    async fn reject(&self, id: Uuid, admin_id: Uuid) -> Result<TrainerChangeRequest>;
}

/// PostgreSQL-backed change request store.
#[derive(Clone)]
pub struct PgTrainerChangeRequestRepository {
    pool: Pool,
}

impl PgTrainerChangeRequestRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrainerChangeRequestRepository for PgTrainerChangeRequestRepository {
    async fn insert(&self, new: NewTrainerChangeRequest) -> Result<TrainerChangeRequest> {
        let client = self.pool.get().await?;
        let id = Uuid::new_v4();
        let query = format!(
            r#"
            INSERT INTO trainer_change_requests
                (id, client_id, current_trainer_id, requested_trainer_id, reason, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let row = client
            .query_one(
                query.as_str(),
                &[
                    &id,
                    &new.client_id,
                    &new.current_trainer_id,
                    &new.requested_trainer_id,
                    &new.reason,
                ],
            )
            .await
            .map_err(|e| AppError::from_constraint(e, PENDING_EXISTS_MESSAGE))?;
        TrainerChangeRequest::try_from(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TrainerChangeRequest>> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {REQUEST_COLUMNS} FROM trainer_change_requests WHERE id = $1");
        let row = client.query_opt(query.as_str(), &[&id]).await?;
        row.as_ref().map(TrainerChangeRequest::try_from).transpose()
    }

    async fn find_pending_for_client(&self, client_id: Uuid) -> Result<Option<TrainerChangeRequest>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM trainer_change_requests
            WHERE client_id = $1 AND status = 'pending'
            "#
        );
        let row = client.query_opt(query.as_str(), &[&client_id]).await?;
        row.as_ref().map(TrainerChangeRequest::try_from).transpose()
    }

    async fn list(&self, status: Option<ChangeRequestStatus>) -> Result<Vec<TrainerChangeRequest>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM trainer_change_requests
            WHERE ($1::change_request_status IS NULL OR status = $1)
            ORDER BY created_at DESC
            "#
        );
        let rows = client.query(query.as_str(), &[&status]).await?;
        rows.iter().map(TrainerChangeRequest::try_from).collect()
    }

    async fn list_for_client(&self, client_id: Uuid) -> Result<Vec<TrainerChangeRequest>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM trainer_change_requests
            WHERE client_id = $1
            ORDER BY created_at DESC
            "#
        );
        let rows = client.query(query.as_str(), &[&client_id]).await?;
        rows.iter().map(TrainerChangeRequest::try_from).collect()
    }

    async fn approve_and_reassign(
        &self,
        id: Uuid,
        admin_id: Uuid,
        client_id: Uuid,
        new_trainer_id: Option<Uuid>,
    ) -> Result<TrainerChangeRequest> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        // Lock the trainer row so a concurrent demotion cannot slip in before commit.
        if let Some(trainer_id) = new_trainer_id {
            transaction
                .query_opt(
                    "SELECT id FROM users WHERE id = $1 AND role = 'trainer' FOR SHARE",
                    &[&trainer_id],
                )
                .await?
                .ok_or_else(|| AppError::NotFound("Requested trainer not found".to_string()))?;
        }

        let query = format!(
            r#"
            UPDATE trainer_change_requests
            SET status = 'approved', processed_by = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let row = transaction
            .query_opt(query.as_str(), &[&id, &admin_id])
            .await?
            .ok_or_else(|| AppError::State(ALREADY_PROCESSED_MESSAGE.to_string()))?;

        let reassigned = transaction
            .execute(
                r#"
                UPDATE users
                SET trainer_id = $2, updated_at = NOW()
                WHERE id = $1 AND role = 'client'
                "#,
                &[&client_id, &new_trainer_id],
            )
            .await?;
        if reassigned == 0 {
            return Err(AppError::NotFound("Client not found".to_string()));
        }

        let request = TrainerChangeRequest::try_from(&row)?;
        transaction.commit().await?;
        Ok(request)
    }

    async fn reject(&self, id: Uuid, admin_id: Uuid) -> Result<TrainerChangeRequest> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            UPDATE trainer_change_requests
            SET status = 'rejected', processed_by = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let row = client
            .query_opt(query.as_str(), &[&id, &admin_id])
            .await?
            .ok_or_else(|| AppError::State(ALREADY_PROCESSED_MESSAGE.to_string()))?;
        TrainerChangeRequest::try_from(&row)
    }
}
