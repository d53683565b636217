use async_trait::async_trait;
use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::notification::{NewNotification, Notification},
};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, kind, title, message, read, metadata, created_at";

/// Persistence for user notifications.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, new: &NewNotification) -> Result<Notification>;

    /// Latest notifications for a user, newest first.
    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>>;

    async fn unread_count(&self, user_id: Uuid) -> Result<i64>;

    /// Marks one of the user's notifications as read. `None` if it isn't theirs or doesn't exist.
    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<Option<Notification>>;

    /// Marks every unread notification of the user as read, returning how many changed.
    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64>;
}

/// PostgreSQL-backed notification store.
#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: Pool,
}

impl PgNotificationRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert(&self, new: &NewNotification) -> Result<Notification> {
        let client = self.pool.get().await?;
        let id = Uuid::new_v4();
        let query = format!(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, message, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let row = client
            .query_one(
                query.as_str(),
                &[&id, &new.user_id, &new.kind, &new.title, &new.message, &new.metadata],
            )
            .await?;
        Notification::try_from(&row)
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );
        let rows = client.query(query.as_str(), &[&user_id, &limit]).await?;
        rows.iter().map(Notification::try_from).collect()
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS unread FROM notifications WHERE user_id = $1 AND read = false",
                &[&user_id],
            )
            .await?;
        Ok(row.try_get("unread")?)
    }

    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<Option<Notification>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            UPDATE notifications
            SET read = true, updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let row = client.query_opt(query.as_str(), &[&id, &user_id]).await?;
        row.as_ref().map(Notification::try_from).transpose()
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE notifications SET read = true, updated_at = NOW() WHERE user_id = $1 AND read = false",
                &[&user_id],
            )
            .await?;
        Ok(updated)
    }
}
