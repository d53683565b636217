use chrono::{DateTime, Utc};
use garde::Validate;
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::user::UserSummary,
};

/// The lifecycle state of a coaching session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "session_status", rename_all = "lowercase")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
    Missed,
}

impl SessionStatus {
    /// Whether a session in this status may move to `next`.
    ///
    /// Re-applying the current status is accepted so that a trainer can amend
    /// feedback or a failure reason without changing state.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        self == next
            || matches!(
                (self, next),
                (Scheduled, Completed)
                    | (Scheduled, Cancelled)
                    | (Scheduled, Missed)
                    | (Missed, Completed)
            )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Missed => "missed",
        };
        f.write_str(name)
    }
}

/// One scheduled coaching engagement between a trainer and a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// The unique identifier for the session.
    pub id: Uuid,
    /// The trainer running the session.
    pub trainer_id: Uuid,
    /// The client attending the session.
    pub client_id: Uuid,
    /// Inclusive start of the session window.
    pub start_time: DateTime<Utc>,
    /// Exclusive end of the session window.
    pub end_time: DateTime<Utc>,
    /// Free-form notes from the trainer.
    pub notes: Option<String>,
    /// The session's status.
    pub status: SessionStatus,
    /// URI of the proof-of-workout image.
    pub evidence_image: Option<String>,
    /// Why the session was missed.
    pub failure_reason: Option<String>,
    /// Trainer feedback after the session.
    pub feedback: Option<String>,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the session was last updated.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&Row> for Session {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
            trainer_id: row.try_get("trainer_id").map_err(|_| AppError::MissingData("trainer_id".to_string()))?,
            client_id: row.try_get("client_id").map_err(|_| AppError::MissingData("client_id".to_string()))?,
            start_time: row.try_get("start_time").map_err(|_| AppError::MissingData("start_time".to_string()))?,
            end_time: row.try_get("end_time").map_err(|_| AppError::MissingData("end_time".to_string()))?,
            notes: row.try_get("notes").map_err(|_| AppError::MissingData("notes".to_string()))?,
            status: row.try_get("status").map_err(|_| AppError::MissingData("status".to_string()))?,
            evidence_image: row.try_get("evidence_image").map_err(|_| AppError::MissingData("evidence_image".to_string()))?,
            failure_reason: row.try_get("failure_reason").map_err(|_| AppError::MissingData("failure_reason".to_string()))?,
            feedback: row.try_get("feedback").map_err(|_| AppError::MissingData("feedback".to_string()))?,
            created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
            updated_at: row.try_get("updated_at").map_err(|_| AppError::MissingData("updated_at".to_string()))?,
        })
    }
}

impl Session {
    /// Whether this session's window intersects `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        intervals_overlap(self.start_time, self.end_time, start, end)
    }
}

/// Half-open interval intersection: `[a_start, a_end)` and `[b_start, b_end)`.
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// A booking to persist.
#[derive(Debug, Clone, Validate)]
pub struct NewSession {
    #[garde(skip)]
    pub trainer_id: Uuid,
    #[garde(skip)]
    pub client_id: Uuid,
    #[garde(skip)]
    pub start_time: DateTime<Utc>,
    #[garde(skip)]
    pub end_time: DateTime<Utc>,
    #[garde(length(chars, max = 2000))]
    pub notes: Option<String>,
}

/// A partial update to a session. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SessionChanges {
    #[garde(skip)]
    pub status: Option<SessionStatus>,
    #[garde(length(chars, min = 1, max = 2048))]
    pub evidence_image: Option<String>,
    #[garde(length(chars, max = 1000))]
    pub failure_reason: Option<String>,
    #[garde(length(chars, max = 2000))]
    pub feedback: Option<String>,
    #[garde(length(chars, max = 2000))]
    pub notes: Option<String>,
}

/// Filters for listing sessions. Date bounds apply to `start_time`, inclusively.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub trainer_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl SessionFilter {
    /// Whether a session satisfies this filter. Cancelled sessions never match.
    #[cfg(test)]
    pub fn matches(&self, session: &Session) -> bool {
        session.status != SessionStatus::Cancelled
            && self.trainer_id.is_none_or(|id| session.trainer_id == id)
            && self.client_id.is_none_or(|id| session.client_id == id)
            && self.from.is_none_or(|from| session.start_time >= from)
            && self.to.is_none_or(|to| session.start_time <= to)
    }
}

/// A session with its trainer and client summaries attached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionWithParticipants {
    #[serde(flatten)]
    pub session: Session,
    pub trainer: Option<UserSummary>,
    pub client: Option<UserSummary>,
}

/// Session counts for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub total: u32,
    pub completed: u32,
    pub missed: u32,
}

impl SessionCounts {
    pub fn record(&mut self, status: SessionStatus) {
        self.total += 1;
        match status {
            SessionStatus::Completed => self.completed += 1,
            SessionStatus::Missed => self.missed += 1,
            _ => {}
        }
    }
}

/// Counts for one ISO week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyStats {
    pub year: i32,
    pub week: u32,
    #[serde(flatten)]
    pub counts: SessionCounts,
}

/// Counts for one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyStats {
    pub year: i32,
    pub month: u32,
    #[serde(flatten)]
    pub counts: SessionCounts,
}

/// Sparse weekly and monthly aggregates, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub weekly: Vec<WeeklyStats>,
    pub monthly: Vec<MonthlyStats>,
}
