use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::session::{NewSession, Session, SessionChanges, SessionFilter, SessionStatus},
};

/// Message used when the storage layer rejects an overlapping booking.
pub const OVERLAP_MESSAGE: &str =
    "Session overlap: trainer already has a session scheduled during this time";

const SESSION_COLUMNS: &str = "id, trainer_id, client_id, start_time, end_time, notes, status, \
     evidence_image, failure_reason, feedback, created_at, updated_at";

/// Persistence for coaching sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Finds a non-cancelled session of `trainer_id` intersecting `[start, end)`.
    async fn find_overlapping(
        &self,
        trainer_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Session>>;

    /// Persists a new session with status `scheduled`.
    ///
    /// Fails with `Conflict` when the trainer's non-overlap rule is violated.
    async fn insert(&self, new: NewSession) -> Result<Session>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>>;

    /// Lists non-cancelled sessions ascending by start time.
    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>>;

    /// Merges `changes` into the session if its status is still `expected`.
    ///
    /// Returns `None` when the session is gone or its status moved on.
    async fn update(
        &self,
        id: Uuid,
        expected: SessionStatus,
        changes: &SessionChanges,
    ) -> Result<Option<Session>>;

    /// Hard-deletes a session. Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Moves every `scheduled` session that ended before `now` to `missed`.
    async fn mark_lapsed_as_missed(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// PostgreSQL-backed session store.
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: Pool,
}

impl PgSessionRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn find_overlapping(
        &self,
        trainer_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE trainer_id = $1
              AND status <> 'cancelled'
              AND start_time < $3
              AND end_time > $2
            ORDER BY start_time ASC
            LIMIT 1
            "#
        );
        let row = client
            .query_opt(query.as_str(), &[&trainer_id, &start, &end])
            .await?;
        row.as_ref().map(Session::try_from).transpose()
    }

    async fn insert(&self, new: NewSession) -> Result<Session> {
        let client = self.pool.get().await?;
        let id = Uuid::new_v4();
        let query = format!(
            r#"
            INSERT INTO sessions (id, trainer_id, client_id, start_time, end_time, notes, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'scheduled')
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let row = client
            .query_one(
                query.as_str(),
                &[
                    &id,
                    &new.trainer_id,
                    &new.client_id,
                    &new.start_time,
                    &new.end_time,
                    &new.notes,
                ],
            )
            .await
            .map_err(|e| AppError::from_constraint(e, OVERLAP_MESSAGE))?;
        Session::try_from(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let row = client.query_opt(query.as_str(), &[&id]).await?;
        row.as_ref().map(Session::try_from).transpose()
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE status <> 'cancelled'
              AND ($1::uuid IS NULL OR trainer_id = $1)
              AND ($2::uuid IS NULL OR client_id = $2)
              AND ($3::timestamptz IS NULL OR start_time >= $3)
              AND ($4::timestamptz IS NULL OR start_time <= $4)
            ORDER BY start_time ASC
            "#
        );
        let rows = client
            .query(
                query.as_str(),
                &[&filter.trainer_id, &filter.client_id, &filter.from, &filter.to],
            )
            .await?;
        rows.iter().map(Session::try_from).collect()
    }

    async fn update(
        &self,
        id: Uuid,
        expected: SessionStatus,
        changes: &SessionChanges,
    ) -> Result<Option<Session>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            UPDATE sessions
            SET status = COALESCE($2, status),
                evidence_image = COALESCE($3, evidence_image),
                failure_reason = COALESCE($4, failure_reason),
                feedback = COALESCE($5, feedback),
                notes = COALESCE($6, notes),
                updated_at = NOW()
            WHERE id = $1 AND status = $7
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let row = client
            .query_opt(
                query.as_str(),
                &[
                    &id,
                    &changes.status,
                    &changes.evidence_image,
                    &changes.failure_reason,
                    &changes.feedback,
                    &changes.notes,
                    &expected,
                ],
            )
            .await
            .map_err(|e| AppError::from_constraint(e, OVERLAP_MESSAGE))?;
        row.as_ref().map(Session::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM sessions WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }

    async fn mark_lapsed_as_missed(&self, now: DateTime<Utc>) -> Result<u64> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE sessions
                SET status = 'missed', updated_at = NOW()
                WHERE status = 'scheduled' AND end_time < $1
                "#,
                &[&now],
            )
            .await?;
        Ok(updated)
    }
}
