//! In-memory repositories used by unit and router tests.
//!
//! A single mutex guards every table, which makes the approval path atomic
//! the same way the PostgreSQL transaction does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        notification::{NewNotification, Notification},
        session::{NewSession, Session, SessionChanges, SessionFilter, SessionStatus},
        trainer_change_request::{ChangeRequestStatus, NewTrainerChangeRequest, TrainerChangeRequest},
        user::{Role, User, UserStatus, UserSummary},
    },
    repositories::{
        notification::NotificationRepository,
        session::{OVERLAP_MESSAGE, SessionRepository},
        trainer_change_request::{
            ALREADY_PROCESSED_MESSAGE, PENDING_EXISTS_MESSAGE, TrainerChangeRequestRepository,
        },
        user::UserRepository,
    },
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    requests: Vec<TrainerChangeRequest>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an active user and returns its ID.
    pub async fn add_user(&self, name: &str, role: Role) -> Uuid {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@example.test", name.to_lowercase()),
            role,
            status: UserStatus::Active,
            trainer_id: None,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        };
        let id = user.id;
        self.tables.lock().await.users.insert(id, user);
        id
    }

    pub async fn user(&self, id: Uuid) -> Option<User> {
        self.tables.lock().await.users.get(&id).cloned()
    }

    pub async fn set_trainer(&self, client_id: Uuid, trainer_id: Option<Uuid>) {
        if let Some(user) = self.tables.lock().await.users.get_mut(&client_id) {
            user.trainer_id = trainer_id;
        }
    }

    pub async fn remove_user(&self, id: Uuid) {
        self.tables.lock().await.users.remove(&id);
    }

    pub async fn set_role(&self, id: Uuid, role: Role) {
        if let Some(user) = self.tables.lock().await.users.get_mut(&id) {
            user.role = role;
        }
    }

    pub async fn set_status(&self, id: Uuid, status: UserStatus) {
        if let Some(user) = self.tables.lock().await.users.get_mut(&id) {
            user.status = status;
        }
    }

    /// Inserts a session as-is, bypassing booking rules. Used to stage past sessions.
    pub async fn put_session(
        &self,
        trainer_id: Uuid,
        client_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: SessionStatus,
    ) -> Uuid {
        let session = Session {
            id: Uuid::new_v4(),
            trainer_id,
            client_id,
            start_time,
            end_time,
            notes: None,
            status,
            evidence_image: None,
            failure_reason: None,
            feedback: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = session.id;
        self.tables.lock().await.sessions.insert(id, session);
        id
    }

    pub async fn session(&self, id: Uuid) -> Option<Session> {
        self.tables.lock().await.sessions.get(&id).cloned()
    }

    pub async fn set_session_status(&self, id: Uuid, status: SessionStatus) {
        if let Some(session) = self.tables.lock().await.sessions.get_mut(&id) {
            session.status = status;
        }
    }

    pub async fn all_sessions(&self) -> Vec<Session> {
        self.tables.lock().await.sessions.values().cloned().collect()
    }

    pub async fn requests_for(&self, client_id: Uuid) -> Vec<TrainerChangeRequest> {
        self.tables
            .lock()
            .await
            .requests
            .iter()
            .filter(|r| r.client_id == client_id)
            .cloned()
            .collect()
    }
}

fn newest_first(mut requests: Vec<TrainerChangeRequest>) -> Vec<TrainerChangeRequest> {
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    requests
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_by_id_and_role(&self, id: Uuid, role: Role) -> Result<Option<User>> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .get(&id)
            .filter(|u| u.role == role)
            .cloned())
    }

    async fn find_summaries(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>> {
        let tables = self.tables.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.users.get(id))
            .map(|u| (u.id, UserSummary::from(u)))
            .collect())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn find_overlapping(
        &self,
        trainer_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.trainer_id == trainer_id && s.status != SessionStatus::Cancelled)
            .find(|s| s.overlaps(start, end))
            .cloned())
    }

    async fn insert(&self, new: NewSession) -> Result<Session> {
        let mut tables = self.tables.lock().await;
        let clash = tables.sessions.values().any(|s| {
            s.trainer_id == new.trainer_id
                && s.status != SessionStatus::Cancelled
                && s.overlaps(new.start_time, new.end_time)
        });
        if clash {
            return Err(AppError::Conflict(OVERLAP_MESSAGE.to_string()));
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            trainer_id: new.trainer_id,
            client_id: new.client_id,
            start_time: new.start_time,
            end_time: new.end_time,
            notes: new.notes,
            status: SessionStatus::Scheduled,
            evidence_image: None,
            failure_reason: None,
            feedback: None,
            created_at: now,
            updated_at: now,
        };
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.tables.lock().await.sessions.get(&id).cloned())
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }

    async fn update(
        &self,
        id: Uuid,
        expected: SessionStatus,
        changes: &SessionChanges,
    ) -> Result<Option<Session>> {
        let mut tables = self.tables.lock().await;
        let Some(session) = tables
            .sessions
            .get_mut(&id)
            .filter(|s| s.status == expected)
        else {
            return Ok(None);
        };
        if let Some(status) = changes.status {
            session.status = status;
        }
        if let Some(evidence) = &changes.evidence_image {
            session.evidence_image = Some(evidence.clone());
        }
        if let Some(reason) = &changes.failure_reason {
            session.failure_reason = Some(reason.clone());
        }
        if let Some(feedback) = &changes.feedback {
            session.feedback = Some(feedback.clone());
        }
        if let Some(notes) = &changes.notes {
            session.notes = Some(notes.clone());
        }
        session.updated_at = Utc::now();
        Ok(Some(session.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.lock().await.sessions.remove(&id).is_some())
    }

    async fn mark_lapsed_as_missed(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut updated = 0;
        for session in tables.sessions.values_mut() {
            if session.status == SessionStatus::Scheduled && session.end_time < now {
                session.status = SessionStatus::Missed;
                session.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl TrainerChangeRequestRepository for MemoryStore {
    async fn insert(&self, new: NewTrainerChangeRequest) -> Result<TrainerChangeRequest> {
        let mut tables = self.tables.lock().await;
        if tables
            .requests
            .iter()
            .any(|r| r.client_id == new.client_id && r.status.is_pending())
        {
            return Err(AppError::Conflict(PENDING_EXISTS_MESSAGE.to_string()));
        }

        let now = Utc::now();
        let request = TrainerChangeRequest {
            id: Uuid::new_v4(),
            client_id: new.client_id,
            current_trainer_id: new.current_trainer_id,
            requested_trainer_id: new.requested_trainer_id,
            reason: new.reason,
            status: ChangeRequestStatus::Pending,
            processed_by: None,
            created_at: now,
            updated_at: now,
        };
        tables.requests.push(request.clone());
        Ok(request)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TrainerChangeRequest>> {
        Ok(self
            .tables
            .lock()
            .await
            .requests
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn find_pending_for_client(&self, client_id: Uuid) -> Result<Option<TrainerChangeRequest>> {
        Ok(self
            .tables
            .lock()
            .await
            .requests
            .iter()
            .find(|r| r.client_id == client_id && r.status.is_pending())
            .cloned())
    }

    async fn list(&self, status: Option<ChangeRequestStatus>) -> Result<Vec<TrainerChangeRequest>> {
        let tables = self.tables.lock().await;
        let requests = tables
            .requests
            .iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        Ok(newest_first(requests))
    }

    async fn list_for_client(&self, client_id: Uuid) -> Result<Vec<TrainerChangeRequest>> {
        let tables = self.tables.lock().await;
        let requests = tables
            .requests
            .iter()
            .filter(|r| r.client_id == client_id)
            .cloned()
            .collect();
        Ok(newest_first(requests))
    }

    async fn approve_and_reassign(
        &self,
        id: Uuid,
        admin_id: Uuid,
        client_id: Uuid,
        new_trainer_id: Option<Uuid>,
    ) -> Result<TrainerChangeRequest> {
        let mut tables = self.tables.lock().await;

        if let Some(trainer_id) = new_trainer_id {
            let is_trainer = tables
                .users
                .get(&trainer_id)
                .is_some_and(|u| u.role == Role::Trainer);
            if !is_trainer {
                return Err(AppError::NotFound("Requested trainer not found".to_string()));
            }
        }

        let index = tables
            .requests
            .iter()
            .position(|r| r.id == id && r.status.is_pending())
            .ok_or_else(|| AppError::State(ALREADY_PROCESSED_MESSAGE.to_string()))?;

        let client = tables
            .users
            .get_mut(&client_id)
            .filter(|u| u.role == Role::Client)
            .ok_or_else(|| AppError::NotFound("Client not found".to_string()))?;
        client.trainer_id = new_trainer_id;
        client.updated_at = Utc::now();

        let request = &mut tables.requests[index];
        request.status = ChangeRequestStatus::Approved;
        request.processed_by = Some(admin_id);
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    async fn reject(&self, id: Uuid, admin_id: Uuid) -> Result<TrainerChangeRequest> {
        let mut tables = self.tables.lock().await;
        let request = tables
            .requests
            .iter_mut()
            .find(|r| r.id == id && r.status.is_pending())
            .ok_or_else(|| AppError::State(ALREADY_PROCESSED_MESSAGE.to_string()))?;
        request.status = ChangeRequestStatus::Rejected;
        request.processed_by = Some(admin_id);
        request.updated_at = Utc::now();
        Ok(request.clone())
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert(&self, new: &NewNotification) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            kind: new.kind,
            title: new.title.clone(),
            message: new.message.clone(),
            read: false,
            metadata: Some(new.metadata.clone()),
            created_at: Utc::now(),
        };
        self.tables.lock().await.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        let tables = self.tables.lock().await;
        let mut notifications: Vec<Notification> = tables
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications.truncate(limit.max(0) as usize);
        Ok(notifications)
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .count() as i64)
    }

    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<Option<Notification>> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
            .map(|n| {
                n.read = true;
                n.clone()
            }))
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut updated = 0;
        for n in tables.notifications.iter_mut().filter(|n| n.user_id == user_id && !n.read) {
            n.read = true;
            updated += 1;
        }
        Ok(updated)
    }
}
