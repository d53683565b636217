use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// The role a user plays on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "user_role", rename_all = "lowercase")]
pub enum Role {
    Admin,
    Trainer,
    Client,
}

/// Whether a user account may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "user_status", rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Blocked,
    Pending,
}

/// Represents a user in the identity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The unique identifier for the user.
    pub id: Uuid,
    /// The user's full name.
    pub name: String,
    /// The user's email address.
    pub email: String,
    /// The user's role.
    pub role: Role,
    /// The user's account status.
    pub status: UserStatus,
    /// The trainer assigned to this user, for clients.
    pub trainer_id: Option<Uuid>,
    /// The user's avatar URL.
    pub avatar_url: Option<String>,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the user was last updated.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&Row> for User {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
            name: row.try_get("name").map_err(|_| AppError::MissingData("name".to_string()))?,
            email: row.try_get("email").map_err(|_| AppError::MissingData("email".to_string()))?,
            role: row.try_get("role").map_err(|_| AppError::MissingData("role".to_string()))?,
            status: row.try_get("status").map_err(|_| AppError::MissingData("status".to_string()))?,
            trainer_id: row.try_get("trainer_id").map_err(|_| AppError::MissingData("trainer_id".to_string()))?,
            avatar_url: row.try_get("avatar_url").map_err(|_| AppError::MissingData("avatar_url".to_string()))?,
            created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
            updated_at: row.try_get("updated_at").map_err(|_| AppError::MissingData("updated_at".to_string()))?,
        })
    }
}

/// The read-only slice of a user that is attached to sessions and change requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub avatar_url: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            avatar_url: user.avatar_url.clone(),
        }
    }
}

impl TryFrom<&Row> for UserSummary {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
            name: row.try_get("name").map_err(|_| AppError::MissingData("name".to_string()))?,
            email: row.try_get("email").map_err(|_| AppError::MissingData("email".to_string()))?,
            role: row.try_get("role").map_err(|_| AppError::MissingData("role".to_string()))?,
            avatar_url: row.try_get("avatar_url").map_err(|_| AppError::MissingData("avatar_url".to_string()))?,
        })
    }
}

/// The authenticated caller, attached to requests by the auth middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    /// Fails with `Forbidden` unless the caller has one of the given roles.
    pub fn require_role(&self, allowed: &[Role]) -> Result<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden("Insufficient permissions".to_string()))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
