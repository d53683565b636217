use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    error::Result,
    models::user::{Role, User, UserSummary},
};

/// Read access to the identity store.
///
/// The trainer assignment is only ever written by the change-request approval
/// transaction, so there is no general-purpose save here.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Finds a user by their ID.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Finds a user by their ID, only if they hold `role`.
    async fn find_by_id_and_role(&self, id: Uuid, role: Role) -> Result<Option<User>>;

    /// Loads summaries for every existing user among `ids`.
    async fn find_summaries(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>>;
}

/// PostgreSQL-backed identity store.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool,
}

impl PgUserRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, name, email, role, status, trainer_id, avatar_url, created_at, updated_at
                FROM users
                WHERE id = $1
                "#,
                &[&id],
            )
            .await?;
        row.as_ref().map(User::try_from).transpose()
    }

    async fn find_by_id_and_role(&self, id: Uuid, role: Role) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, name, email, role, status, trainer_id, avatar_url, created_at, updated_at
                FROM users
                WHERE id = $1 AND role = $2
                "#,
                &[&id, &role],
            )
            .await?;
        row.as_ref().map(User::try_from).transpose()
    }

    async fn find_summaries(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, name, email, role, avatar_url
                FROM users
                WHERE id = ANY($1)
                "#,
                &[&ids],
            )
            .await?;

        rows.iter()
            .map(|row| UserSummary::try_from(row).map(|summary| (summary.id, summary)))
            .collect()
    }
}
