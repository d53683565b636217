use chrono::{DateTime, Utc};
use garde::Validate;
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::user::UserSummary,
};

/// Status of a trainer change request. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "change_request_status", rename_all = "lowercase")]
pub enum ChangeRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl ChangeRequestStatus {
    pub fn is_pending(self) -> bool {
        self == ChangeRequestStatus::Pending
    }
}

/// A client's petition to move to another trainer, or to none.
#[derive(Debug, Clone)]
pub struct TrainerChangeRequest {
    pub id: Uuid,
    pub client_id: Uuid,
    /// Snapshot of the client's trainer when the request was filed.
    pub current_trainer_id: Option<Uuid>,
    /// `None` asks for the client to be unassigned.
    pub requested_trainer_id: Option<Uuid>,
    pub reason: String,
    pub status: ChangeRequestStatus,
    /// The admin who decided the request.
    pub processed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&Row> for TrainerChangeRequest {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
            client_id: row.try_get("client_id").map_err(|_| AppError::MissingData("client_id".to_string()))?,
            current_trainer_id: row.try_get("current_trainer_id").map_err(|_| AppError::MissingData("current_trainer_id".to_string()))?,
            requested_trainer_id: row.try_get("requested_trainer_id").map_err(|_| AppError::MissingData("requested_trainer_id".to_string()))?,
            reason: row.try_get("reason").map_err(|_| AppError::MissingData("reason".to_string()))?,
            status: row.try_get("status").map_err(|_| AppError::MissingData("status".to_string()))?,
            processed_by: row.try_get("processed_by").map_err(|_| AppError::MissingData("processed_by".to_string()))?,
            created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
            updated_at: row.try_get("updated_at").map_err(|_| AppError::MissingData("updated_at".to_string()))?,
        })
    }
}

/// A change request to persist with status `pending`.
#[derive(Debug, Clone, Validate)]
pub struct NewTrainerChangeRequest {
    #[garde(skip)]
    pub client_id: Uuid,
    #[garde(skip)]
    pub current_trainer_id: Option<Uuid>,
    #[garde(skip)]
    pub requested_trainer_id: Option<Uuid>,
    #[garde(length(chars, min = 5, max = 500))]
    pub reason: String,
}

/// A change request with every user reference expanded to a summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainerChangeRequestView {
    pub id: Uuid,
    pub client: Option<UserSummary>,
    pub current_trainer: Option<UserSummary>,
    pub requested_trainer: Option<UserSummary>,
    pub reason: String,
    pub status: ChangeRequestStatus,
    pub processed_by: Option<UserSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
