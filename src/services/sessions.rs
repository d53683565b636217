use chrono::{DateTime, Datelike, Duration, Months, Utc};
use garde::Validate;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        notification::NotificationKind,
        session::{
            MonthlyStats, NewSession, Session, SessionChanges, SessionCounts, SessionFilter,
            SessionStats, SessionStatus, SessionWithParticipants, WeeklyStats,
        },
        user::{AuthUser, Role, UserSummary},
    },
    repositories::session::OVERLAP_MESSAGE,
    state::AppState,
};

/// Minimum lead time between booking and the session start.
const BOOKING_LEAD_HOURS: i64 = 1;
/// How long after its start a session may still be marked completed.
const COMPLETION_WINDOW_HOURS: i64 = 24;
/// How far back statistics reach.
const STATS_LOOKBACK_MONTHS: u32 = 6;

pub const TOO_SOON_MESSAGE: &str = "Session is too soon: sessions must be booked at least 1 hour in advance";
pub const COMPLETION_WINDOW_MESSAGE: &str =
    "Completion window expired: a session can only be completed within 24 hours of its start";

/// Realtime event sent to the client when a session is booked for them.
pub const SESSION_SCHEDULED_EVENT: &str = "session_scheduled";

/// Rejects windows that are inverted or start less than an hour after `now`.
pub fn ensure_bookable(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if end <= start {
        return Err(AppError::validation("endTime must be after startTime"));
    }
    if start < now + Duration::hours(BOOKING_LEAD_HOURS) {
        return Err(AppError::Scheduling(TOO_SOON_MESSAGE.to_string()));
    }
    Ok(())
}

/// Rejects completion more than 24 hours after `start`. Exactly 24 hours is still accepted.
pub fn ensure_completion_window(start: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if now - start > Duration::hours(COMPLETION_WINDOW_HOURS) {
        return Err(AppError::Scheduling(COMPLETION_WINDOW_MESSAGE.to_string()));
    }
    Ok(())
}

/// Decides which trainer a booking is made for.
///
/// Trainers always book for themselves. Admins must name the trainer.
pub fn booking_trainer(actor: &AuthUser, requested: Option<Uuid>) -> Result<Uuid> {
    match actor.role {
        Role::Trainer => Ok(actor.id),
        Role::Admin => requested.ok_or_else(|| AppError::validation("trainerId is required")),
        Role::Client => Err(AppError::Forbidden("Insufficient permissions".to_string())),
    }
}

fn ensure_participant(actor: &AuthUser, session: &Session) -> Result<()> {
    if actor.is_admin() || actor.id == session.trainer_id || actor.id == session.client_id {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not a participant of this session".to_string()))
    }
}

async fn with_participants(
    state: &AppState,
    sessions: Vec<Session>,
) -> Result<Vec<SessionWithParticipants>> {
    let mut ids: Vec<Uuid> = sessions
        .iter()
        .flat_map(|s| [s.trainer_id, s.client_id])
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let summaries: HashMap<Uuid, UserSummary> = state.users.find_summaries(&ids).await?;

    Ok(sessions
        .into_iter()
        .map(|session| SessionWithParticipants {
            trainer: summaries.get(&session.trainer_id).cloned(),
            client: summaries.get(&session.client_id).cloned(),
            session,
        })
        .collect())
}

async fn find_session(state: &AppState, id: Uuid) -> Result<Session> {
    state
        .sessions
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
}

/// Books a session.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `new` - The booking. `trainer_id` must already be resolved.
///
/// # Returns
///
/// The stored session with both participants attached.
pub async fn create(state: &AppState, new: NewSession) -> Result<SessionWithParticipants> {
    new.validate().map_err(AppError::from_report)?;
    ensure_bookable(new.start_time, new.end_time, Utc::now())?;

    let trainer = state
        .users
        .find_by_id_and_role(new.trainer_id, Role::Trainer)
        .await?
        .ok_or_else(|| AppError::NotFound("Trainer not found".to_string()))?;
    let client = state
        .users
        .find_by_id_and_role(new.client_id, Role::Client)
        .await?
        .ok_or_else(|| AppError::NotFound("Client not found".to_string()))?;

    if let Some(existing) = state
        .sessions
        .find_overlapping(new.trainer_id, new.start_time, new.end_time)
        .await?
        .filter(|s| s.overlaps(new.start_time, new.end_time))
    {
        tracing::debug!("Booking overlaps session {}", existing.id);
        return Err(AppError::Conflict(OVERLAP_MESSAGE.to_string()));
    }

    let session = state.sessions.insert(new).await?;
    tracing::info!(
        "📅 Session {} booked: trainer {} with client {}",
        session.id,
        trainer.id,
        client.id
    );

    state.notifier.emit_realtime(
        client.id,
        SESSION_SCHEDULED_EVENT,
        json!({
            "sessionId": session.id,
            "trainerName": trainer.name,
            "startTime": session.start_time,
        }),
    );
    state.notifier.notify(
        client.id,
        NotificationKind::SessionScheduled,
        "New session scheduled",
        format!(
            "{} scheduled a new session for {}",
            trainer.name,
            session.start_time.format("%Y-%m-%d %H:%M UTC")
        ),
        json!({ "sessionId": session.id, "trainerId": trainer.id }),
    );

    Ok(SessionWithParticipants {
        session,
        trainer: Some(UserSummary::from(&trainer)),
        client: Some(UserSummary::from(&client)),
    })
}

/// Lists sessions visible to `actor`.
///
/// Trainers only see their own sessions and clients only theirs, whatever the
/// filter asks for. Admins may filter freely.
pub async fn list(
    state: &AppState,
    actor: &AuthUser,
    mut filter: SessionFilter,
) -> Result<Vec<SessionWithParticipants>> {
    match actor.role {
        Role::Trainer => filter.trainer_id = Some(actor.id),
        Role::Client => filter.client_id = Some(actor.id),
        Role::Admin => {}
    }

    let sessions = state.sessions.list(&filter).await?;
    with_participants(state, sessions).await
}

pub async fn get_by_id(state: &AppState, actor: &AuthUser, id: Uuid) -> Result<SessionWithParticipants> {
    let session = find_session(state, id).await?;
    ensure_participant(actor, &session)?;

    with_participants(state, vec![session])
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal("Session vanished while attaching participants".to_string()))
}

/// Applies a partial update to a session.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `actor` - The caller. Must take part in the session or be an admin.
/// * `id` - The session to update.
/// * `changes` - The fields to change.
///
/// # Returns
///
/// The updated session with both participants attached.
pub async fn update(
    state: &AppState,
    actor: &AuthUser,
    id: Uuid,
    changes: SessionChanges,
) -> Result<SessionWithParticipants> {
    changes.validate().map_err(AppError::from_report)?;

    let current = find_session(state, id).await?;
    ensure_participant(actor, &current)?;

    let now = Utc::now();
    if let Some(next) = changes.status {
        if !current.status.can_transition_to(next) {
            return Err(AppError::State(format!(
                "Cannot change session status from {} to {}",
                current.status, next
            )));
        }
        if next == SessionStatus::Completed {
            ensure_completion_window(current.start_time, now)?;
        }
    }

    let updated = match state.sessions.update(id, current.status, &changes).await? {
        Some(updated) => updated,
        None => {
            let latest = find_session(state, id).await?;
            tracing::warn!(
                "⚠️ Session {} moved from {} to {} during update",
                id,
                current.status,
                latest.status
            );
            return Err(AppError::State(format!(
                "Session status changed to {} while updating, retry the request",
                latest.status
            )));
        }
    };

    let mut expanded = with_participants(state, vec![updated]).await?;
    let result = expanded
        .pop()
        .ok_or_else(|| AppError::Internal("Session vanished while attaching participants".to_string()))?;

    let newly_missed =
        changes.status == Some(SessionStatus::Missed) && current.status != SessionStatus::Missed;
    if newly_missed {
        let client_name = result
            .client
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or("Client");
        let reason = changes.failure_reason.as_deref().unwrap_or("unspecified");

        state.notifier.notify(
            current.trainer_id,
            NotificationKind::System,
            "Missed session",
            format!(
                "{} missed the session of {}. Reason: {}.",
                client_name,
                current.start_time.format("%Y-%m-%d %H:%M UTC"),
                reason
            ),
            json!({ "sessionId": current.id, "clientId": current.client_id }),
        );
    }

    Ok(result)
}

/// Hard-deletes a session. Only its trainer or an admin may do this.
pub async fn delete(state: &AppState, actor: &AuthUser, id: Uuid) -> Result<()> {
    let session = find_session(state, id).await?;
    if !actor.is_admin() && actor.id != session.trainer_id {
        return Err(AppError::Forbidden("Only the session's trainer can delete it".to_string()));
    }

    if !state.sessions.delete(id).await? {
        return Err(AppError::NotFound("Session not found".to_string()));
    }
    tracing::info!("🗑️ Session {} deleted by {}", id, actor.id);
    Ok(())
}

/// Resolves whose statistics a caller asks for.
///
/// Trainers and admins may look at one client by passing `client_id`.
pub fn stats_subject(actor: &AuthUser, client_id: Option<Uuid>) -> Result<(Uuid, Role)> {
    match (actor.role, client_id) {
        (Role::Client, _) => Ok((actor.id, Role::Client)),
        (Role::Trainer, None) => Ok((actor.id, Role::Trainer)),
        (Role::Trainer | Role::Admin, Some(client)) => Ok((client, Role::Client)),
        (Role::Admin, None) => Err(AppError::validation("clientId is required")),
    }
}

/// Weekly and monthly counts for a user over the last six months.
pub async fn stats(state: &AppState, user_id: Uuid, role: Role) -> Result<SessionStats> {
    let now = Utc::now();
    let since = now
        .checked_sub_months(Months::new(STATS_LOOKBACK_MONTHS))
        .ok_or_else(|| AppError::Internal("Statistics window out of range".to_string()))?;

    let mut filter = SessionFilter {
        from: Some(since),
        ..Default::default()
    };
    match role {
        Role::Client => filter.client_id = Some(user_id),
        _ => filter.trainer_id = Some(user_id),
    }

    let sessions = state.sessions.list(&filter).await?;
    Ok(aggregate_stats(&sessions))
}

/// Groups sessions by ISO week and by calendar month (UTC). Empty buckets are omitted.
pub fn aggregate_stats(sessions: &[Session]) -> SessionStats {
    let mut weekly: BTreeMap<(i32, u32), SessionCounts> = BTreeMap::new();
    let mut monthly: BTreeMap<(i32, u32), SessionCounts> = BTreeMap::new();

    for session in sessions.iter().filter(|s| s.status != SessionStatus::Cancelled) {
        let week = session.start_time.iso_week();
        weekly
            .entry((week.year(), week.week()))
            .or_default()
            .record(session.status);
        monthly
            .entry((session.start_time.year(), session.start_time.month()))
            .or_default()
            .record(session.status);
    }

    SessionStats {
        weekly: weekly
            .into_iter()
            .map(|((year, week), counts)| WeeklyStats { year, week, counts })
            .collect(),
        monthly: monthly
            .into_iter()
            .map(|((year, month), counts)| MonthlyStats { year, month, counts })
            .collect(),
    }
}

/// Moves every scheduled session whose end has passed to `missed`.
pub async fn mark_lapsed_sessions(state: &AppState) -> Result<u64> {
    state.sessions.mark_lapsed_as_missed(Utc::now()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        notifier::Dispatch,
        repositories::{memory::MemoryStore, session::SessionRepository},
    };
    use chrono::{TimeZone, Timelike};
    use std::sync::Arc;
    use tokio::sync::mpsc::Receiver;

    struct Fixture {
        state: AppState,
        store: Arc<MemoryStore>,
        dispatched: Receiver<Dispatch>,
        trainer: AuthUser,
        client: AuthUser,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let trainer = store.add_user("Tina", Role::Trainer).await;
        let client = store.add_user("Carl", Role::Client).await;
        let (state, dispatched) = AppState::in_memory(store.clone());
        Fixture {
            state,
            store,
            dispatched,
            trainer: AuthUser { id: trainer, role: Role::Trainer },
            client: AuthUser { id: client, role: Role::Client },
        }
    }

    fn tomorrow_at(hour: u32, minute: u32) -> DateTime<Utc> {
        (Utc::now() + Duration::days(1))
            .with_hour(hour)
            .and_then(|t| t.with_minute(minute))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap()
    }

    fn booking(f: &Fixture, start: DateTime<Utc>, end: DateTime<Utc>) -> NewSession {
        NewSession {
            trainer_id: f.trainer.id,
            client_id: f.client.id,
            start_time: start,
            end_time: end,
            notes: None,
        }
    }

    fn drain(rx: &mut Receiver<Dispatch>) -> Vec<Dispatch> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn booking_window_rules() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();

        assert!(ensure_bookable(now + Duration::hours(1), now + Duration::hours(2), now).is_ok());
        assert!(matches!(
            ensure_bookable(now + Duration::minutes(59), now + Duration::hours(2), now),
            Err(AppError::Scheduling(_))
        ));
        assert!(matches!(
            ensure_bookable(now - Duration::days(1), now, now),
            Err(AppError::Scheduling(_))
        ));
        assert!(matches!(
            ensure_bookable(now + Duration::hours(3), now + Duration::hours(3), now),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn completion_window_is_inclusive_at_24_hours() {
        let now = Utc.with_ymd_and_hms(2026, 5, 2, 12, 0, 0).unwrap();

        assert!(ensure_completion_window(now - Duration::hours(24), now).is_ok());
        assert!(ensure_completion_window(now - Duration::hours(1), now).is_ok());
        assert!(matches!(
            ensure_completion_window(now - Duration::hours(24) - Duration::seconds(1), now),
            Err(AppError::Scheduling(_))
        ));
        assert!(ensure_completion_window(now - Duration::hours(30), now).is_err());
    }

    #[test]
    fn booking_trainer_by_role() {
        let trainer = AuthUser { id: Uuid::new_v4(), role: Role::Trainer };
        let admin = AuthUser { id: Uuid::new_v4(), role: Role::Admin };
        let client = AuthUser { id: Uuid::new_v4(), role: Role::Client };
        let other = Uuid::new_v4();

        assert_eq!(booking_trainer(&trainer, Some(other)).unwrap(), trainer.id);
        assert_eq!(booking_trainer(&admin, Some(other)).unwrap(), other);
        assert!(matches!(booking_trainer(&admin, None), Err(AppError::Validation { .. })));
        assert!(matches!(booking_trainer(&client, None), Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn overlapping_booking_is_rejected_and_abutting_is_allowed() {
        let mut f = fixture().await;

        let first = create(&f.state, booking(&f, tomorrow_at(8, 0), tomorrow_at(9, 0)))
            .await
            .unwrap();
        assert_eq!(first.session.status, SessionStatus::Scheduled);
        assert_eq!(first.client.as_ref().unwrap().name, "Carl");

        for (start, end) in [
            (tomorrow_at(8, 30), tomorrow_at(9, 30)),
            (tomorrow_at(8, 0), tomorrow_at(9, 0)),
            (tomorrow_at(8, 15), tomorrow_at(8, 45)),
            (tomorrow_at(7, 0), tomorrow_at(10, 0)),
        ] {
            let err = create(&f.state, booking(&f, start, end)).await.unwrap_err();
            assert!(matches!(err, AppError::Conflict(ref m) if m == OVERLAP_MESSAGE));
        }

        create(&f.state, booking(&f, tomorrow_at(9, 0), tomorrow_at(10, 0)))
            .await
            .unwrap();
        assert_eq!(f.store.all_sessions().await.len(), 2);

        let dispatched = drain(&mut f.dispatched);
        assert!(dispatched.iter().any(|d| matches!(
            d,
            Dispatch::Realtime { room, event } if *room == f.client.id && event.event == SESSION_SCHEDULED_EVENT
        )));
        assert!(dispatched.iter().any(|d| matches!(
            d,
            Dispatch::Notify(n) if n.user_id == f.client.id && n.kind == NotificationKind::SessionScheduled
        )));
    }

    #[tokio::test]
    async fn cancelled_sessions_do_not_block_the_slot() {
        let f = fixture().await;
        f.store
            .put_session(
                f.trainer.id,
                f.client.id,
                tomorrow_at(8, 0),
                tomorrow_at(9, 0),
                SessionStatus::Cancelled,
            )
            .await;

        assert!(create(&f.state, booking(&f, tomorrow_at(8, 0), tomorrow_at(9, 0))).await.is_ok());
    }

    #[tokio::test]
    async fn booking_twenty_minutes_ahead_is_too_soon() {
        let f = fixture().await;
        let start = Utc::now() + Duration::minutes(20);

        let err = create(&f.state, booking(&f, start, start + Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Scheduling(ref m) if m == TOO_SOON_MESSAGE));
        assert!(f.store.all_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn booking_for_an_unknown_client_is_not_found() {
        let f = fixture().await;
        let mut new = booking(&f, tomorrow_at(8, 0), tomorrow_at(9, 0));
        new.client_id = Uuid::new_v4();

        assert!(matches!(create(&f.state, new).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn stale_session_cannot_be_completed_but_can_be_missed() {
        let mut f = fixture().await;
        let start = Utc::now() - Duration::hours(30);
        let id = f
            .store
            .put_session(f.trainer.id, f.client.id, start, start + Duration::hours(1), SessionStatus::Scheduled)
            .await;

        let completed = SessionChanges {
            status: Some(SessionStatus::Completed),
            ..Default::default()
        };
        let err = update(&f.state, &f.trainer, id, completed).await.unwrap_err();
        assert!(matches!(err, AppError::Scheduling(ref m) if m == COMPLETION_WINDOW_MESSAGE));
        assert_eq!(f.store.session(id).await.unwrap().status, SessionStatus::Scheduled);

        let missed = SessionChanges {
            status: Some(SessionStatus::Missed),
            failure_reason: Some("Sick".to_string()),
            ..Default::default()
        };
        let updated = update(&f.state, &f.trainer, id, missed).await.unwrap();
        assert_eq!(updated.session.status, SessionStatus::Missed);
        assert_eq!(updated.session.failure_reason.as_deref(), Some("Sick"));

        let dispatched = drain(&mut f.dispatched);
        let alert = dispatched
            .iter()
            .find_map(|d| match d {
                Dispatch::Notify(n) if n.user_id == f.trainer.id => Some(n),
                _ => None,
            })
            .expect("trainer notification");
        assert_eq!(alert.kind, NotificationKind::System);
        assert!(alert.message.contains("Sick"));
        assert!(alert.message.contains("Carl"));
    }

    #[tokio::test]
    async fn missed_again_does_not_notify_twice() {
        let mut f = fixture().await;
        let start = Utc::now() - Duration::hours(3);
        let id = f
            .store
            .put_session(f.trainer.id, f.client.id, start, start + Duration::hours(1), SessionStatus::Missed)
            .await;

        let changes = SessionChanges {
            status: Some(SessionStatus::Missed),
            failure_reason: Some("Traffic".to_string()),
            ..Default::default()
        };
        update(&f.state, &f.trainer, id, changes).await.unwrap();
        assert!(drain(&mut f.dispatched).is_empty());
    }

    #[tokio::test]
    async fn missed_without_reason_says_unspecified() {
        let mut f = fixture().await;
        let start = Utc::now() - Duration::hours(2);
        let id = f
            .store
            .put_session(f.trainer.id, f.client.id, start, start + Duration::hours(1), SessionStatus::Scheduled)
            .await;

        let changes = SessionChanges {
            status: Some(SessionStatus::Missed),
            ..Default::default()
        };
        update(&f.state, &f.trainer, id, changes).await.unwrap();

        let message = drain(&mut f.dispatched)
            .into_iter()
            .find_map(|d| match d {
                Dispatch::Notify(n) => Some(n.message),
                _ => None,
            })
            .unwrap();
        assert!(message.ends_with("Reason: unspecified."));
    }

    #[tokio::test]
    async fn recent_missed_session_can_be_completed() {
        let f = fixture().await;
        let start = Utc::now() - Duration::hours(5);
        let id = f
            .store
            .put_session(f.trainer.id, f.client.id, start, start + Duration::hours(1), SessionStatus::Missed)
            .await;

        let changes = SessionChanges {
            status: Some(SessionStatus::Completed),
            feedback: Some("Made it up".to_string()),
            ..Default::default()
        };
        let updated = update(&f.state, &f.client, id, changes).await.unwrap();
        assert_eq!(updated.session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn illegal_transition_is_a_state_error() {
        let f = fixture().await;
        let start = Utc::now() - Duration::hours(2);
        let id = f
            .store
            .put_session(f.trainer.id, f.client.id, start, start + Duration::hours(1), SessionStatus::Completed)
            .await;

        let changes = SessionChanges {
            status: Some(SessionStatus::Scheduled),
            ..Default::default()
        };
        assert!(matches!(
            update(&f.state, &f.trainer, id, changes).await,
            Err(AppError::State(_))
        ));
    }

    #[tokio::test]
    async fn outsiders_cannot_read_or_delete() {
        let f = fixture().await;
        let id = f
            .store
            .put_session(f.trainer.id, f.client.id, tomorrow_at(8, 0), tomorrow_at(9, 0), SessionStatus::Scheduled)
            .await;
        let stranger = AuthUser {
            id: f.store.add_user("Sam", Role::Trainer).await,
            role: Role::Trainer,
        };

        assert!(matches!(get_by_id(&f.state, &stranger, id).await, Err(AppError::Forbidden(_))));
        assert!(matches!(delete(&f.state, &stranger, id).await, Err(AppError::Forbidden(_))));
        assert!(matches!(delete(&f.state, &f.client, id).await, Err(AppError::Forbidden(_))));

        delete(&f.state, &f.trainer, id).await.unwrap();
        assert!(matches!(get_by_id(&f.state, &f.trainer, id).await, Err(AppError::NotFound(_))));
        assert!(matches!(delete(&f.state, &f.trainer, id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_is_scoped_to_the_caller_and_sorted() {
        let f = fixture().await;
        let other_client = f.store.add_user("Olga", Role::Client).await;
        f.store
            .put_session(f.trainer.id, other_client, tomorrow_at(10, 0), tomorrow_at(11, 0), SessionStatus::Scheduled)
            .await;
        f.store
            .put_session(f.trainer.id, f.client.id, tomorrow_at(8, 0), tomorrow_at(9, 0), SessionStatus::Scheduled)
            .await;
        f.store
            .put_session(f.trainer.id, f.client.id, tomorrow_at(12, 0), tomorrow_at(13, 0), SessionStatus::Cancelled)
            .await;

        let trainer_view = list(&f.state, &f.trainer, SessionFilter::default()).await.unwrap();
        assert_eq!(trainer_view.len(), 2);
        assert!(trainer_view[0].session.start_time < trainer_view[1].session.start_time);

        let client_view = list(&f.state, &f.client, SessionFilter::default()).await.unwrap();
        assert_eq!(client_view.len(), 1);
        assert_eq!(client_view[0].trainer.as_ref().unwrap().name, "Tina");
    }

    #[test]
    fn stats_are_sparse_and_ascending() {
        let session = |y, m, d, status| Session {
            id: Uuid::new_v4(),
            trainer_id: Uuid::nil(),
            client_id: Uuid::nil(),
            start_time: Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(y, m, d, 11, 0, 0).unwrap(),
            notes: None,
            status,
            evidence_image: None,
            failure_reason: None,
            feedback: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stats = aggregate_stats(&[
            session(2026, 3, 4, SessionStatus::Missed),
            session(2026, 1, 6, SessionStatus::Completed),
            session(2026, 1, 7, SessionStatus::Scheduled),
            session(2026, 1, 8, SessionStatus::Cancelled),
        ]);

        // 2026-01-06 and 2026-01-07 share ISO week 2, 2026-03-04 is week 10
        assert_eq!(stats.weekly.len(), 2);
        assert_eq!((stats.weekly[0].year, stats.weekly[0].week), (2026, 2));
        assert_eq!(
            stats.weekly[0].counts,
            SessionCounts { total: 2, completed: 1, missed: 0 }
        );
        assert_eq!((stats.weekly[1].year, stats.weekly[1].week), (2026, 10));

        assert_eq!(stats.monthly.len(), 2);
        assert_eq!((stats.monthly[0].month, stats.monthly[1].month), (1, 3));
        assert_eq!(stats.monthly[1].counts.missed, 1);
    }

    #[test]
    fn iso_week_year_differs_from_calendar_year_at_the_boundary() {
        let s = Session {
            id: Uuid::new_v4(),
            trainer_id: Uuid::nil(),
            client_id: Uuid::nil(),
            start_time: Utc.with_ymd_and_hms(2027, 1, 1, 9, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2027, 1, 1, 10, 0, 0).unwrap(),
            notes: None,
            status: SessionStatus::Completed,
            evidence_image: None,
            failure_reason: None,
            feedback: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stats = aggregate_stats(&[s]);
        // 2027-01-01 is a Friday in ISO week 53 of 2026
        assert_eq!((stats.weekly[0].year, stats.weekly[0].week), (2026, 53));
        assert_eq!((stats.monthly[0].year, stats.monthly[0].month), (2027, 1));
    }

    #[test]
    fn stats_subject_by_role() {
        let trainer = AuthUser { id: Uuid::new_v4(), role: Role::Trainer };
        let client = AuthUser { id: Uuid::new_v4(), role: Role::Client };
        let admin = AuthUser { id: Uuid::new_v4(), role: Role::Admin };
        let target = Uuid::new_v4();

        assert_eq!(stats_subject(&trainer, None).unwrap(), (trainer.id, Role::Trainer));
        assert_eq!(stats_subject(&trainer, Some(target)).unwrap(), (target, Role::Client));
        assert_eq!(stats_subject(&client, Some(target)).unwrap(), (client.id, Role::Client));
        assert_eq!(stats_subject(&admin, Some(target)).unwrap(), (target, Role::Client));
        assert!(stats_subject(&admin, None).is_err());
    }

    #[tokio::test]
    async fn sweep_marks_only_lapsed_scheduled_sessions() {
        let f = fixture().await;
        let past = Utc::now() - Duration::hours(4);
        let lapsed = f
            .store
            .put_session(f.trainer.id, f.client.id, past, past + Duration::hours(1), SessionStatus::Scheduled)
            .await;
        let done = f
            .store
            .put_session(f.trainer.id, f.client.id, past - Duration::hours(2), past - Duration::hours(1), SessionStatus::Completed)
            .await;
        let upcoming = f
            .store
            .put_session(f.trainer.id, f.client.id, tomorrow_at(8, 0), tomorrow_at(9, 0), SessionStatus::Scheduled)
            .await;

        assert_eq!(mark_lapsed_sessions(&f.state).await.unwrap(), 1);
        assert_eq!(f.store.session(lapsed).await.unwrap().status, SessionStatus::Missed);
        assert_eq!(f.store.session(done).await.unwrap().status, SessionStatus::Completed);
        assert_eq!(f.store.session(upcoming).await.unwrap().status, SessionStatus::Scheduled);
    }

    /// Session store that misbehaves in controlled ways: it can flip the stored
    /// status right before a write, like a sweep or cancel landing between read
    /// and update, and it can answer overlap lookups with closed intervals.
    struct SkewedSessions {
        inner: Arc<MemoryStore>,
        interleaved: Option<SessionStatus>,
        closed_intervals: bool,
    }

    impl SkewedSessions {
        fn interleaving(inner: Arc<MemoryStore>, status: SessionStatus) -> Self {
            Self { inner, interleaved: Some(status), closed_intervals: false }
        }
    }

    #[async_trait::async_trait]
    impl SessionRepository for SkewedSessions {
        async fn find_overlapping(
            &self,
            trainer_id: Uuid,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Option<Session>> {
            if !self.closed_intervals {
                return self.inner.find_overlapping(trainer_id, start, end).await;
            }
            Ok(self.inner.all_sessions().await.into_iter().find(|s| {
                s.trainer_id == trainer_id
                    && s.status != SessionStatus::Cancelled
                    && s.start_time <= end
                    && s.end_time >= start
            }))
        }

        async fn insert(&self, new: NewSession) -> Result<Session> {
            SessionRepository::insert(&*self.inner, new).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>> {
            SessionRepository::find_by_id(&*self.inner, id).await
        }

        async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
            SessionRepository::list(&*self.inner, filter).await
        }

        async fn update(
            &self,
            id: Uuid,
            expected: SessionStatus,
            changes: &SessionChanges,
        ) -> Result<Option<Session>> {
            if let Some(status) = self.interleaved {
                self.inner.set_session_status(id, status).await;
            }
            SessionRepository::update(&*self.inner, id, expected, changes).await
        }

        async fn delete(&self, id: Uuid) -> Result<bool> {
            SessionRepository::delete(&*self.inner, id).await
        }

        async fn mark_lapsed_as_missed(&self, now: DateTime<Utc>) -> Result<u64> {
            self.inner.mark_lapsed_as_missed(now).await
        }
    }

    #[tokio::test]
    async fn status_change_between_read_and_write_is_rejected() {
        let mut f = fixture().await;
        let start = Utc::now() - Duration::hours(2);

        for (interleaved, requested) in [
            (SessionStatus::Cancelled, SessionStatus::Completed),
            (SessionStatus::Missed, SessionStatus::Cancelled),
        ] {
            let id = f
                .store
                .put_session(f.trainer.id, f.client.id, start, start + Duration::hours(1), SessionStatus::Scheduled)
                .await;
            f.state.sessions = Arc::new(SkewedSessions::interleaving(f.store.clone(), interleaved));

            let changes = SessionChanges {
                status: Some(requested),
                ..Default::default()
            };
            let err = update(&f.state, &f.trainer, id, changes).await.unwrap_err();
            assert!(matches!(err, AppError::State(_)), "{interleaved} -> {requested}: {err:?}");
            assert_eq!(f.store.session(id).await.unwrap().status, interleaved);
        }
        assert!(drain(&mut f.dispatched).is_empty());
    }

    #[tokio::test]
    async fn abutting_session_reported_by_the_lookup_does_not_block_booking() {
        let mut f = fixture().await;
        f.store
            .put_session(f.trainer.id, f.client.id, tomorrow_at(8, 0), tomorrow_at(9, 0), SessionStatus::Scheduled)
            .await;
        f.state.sessions = Arc::new(SkewedSessions {
            inner: f.store.clone(),
            interleaved: None,
            closed_intervals: true,
        });

        create(&f.state, booking(&f, tomorrow_at(9, 0), tomorrow_at(10, 0)))
            .await
            .unwrap();
        let err = create(&f.state, booking(&f, tomorrow_at(9, 30), tomorrow_at(10, 30)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_of_a_session_deleted_meanwhile_is_not_found() {
        let f = fixture().await;
        let id = f
            .store
            .put_session(f.trainer.id, f.client.id, tomorrow_at(8, 0), tomorrow_at(9, 0), SessionStatus::Scheduled)
            .await;
        SessionRepository::delete(&*f.store, id).await.unwrap();

        let changes = SessionChanges {
            notes: Some("Bring a towel".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            update(&f.state, &f.trainer, id, changes).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stats_cover_six_months_of_the_subject_only() {
        let f = fixture().await;
        let other_trainer = f.store.add_user("Otto", Role::Trainer).await;
        let other_client = f.store.add_user("Olga", Role::Client).await;
        let ago = |days: i64| Utc::now() - Duration::days(days);
        let hour = Duration::hours(1);

        // counted for both
        f.store
            .put_session(f.trainer.id, f.client.id, ago(14), ago(14) + hour, SessionStatus::Completed)
            .await;
        // outside the window
        f.store
            .put_session(f.trainer.id, f.client.id, ago(213), ago(213) + hour, SessionStatus::Completed)
            .await;
        f.store
            .put_session(f.trainer.id, f.client.id, ago(7), ago(7) + hour, SessionStatus::Cancelled)
            .await;
        // trainer only
        f.store
            .put_session(f.trainer.id, other_client, ago(3), ago(3) + hour, SessionStatus::Missed)
            .await;
        f.store
            .put_session(f.trainer.id, other_client, ago(1), ago(1) + hour, SessionStatus::Scheduled)
            .await;
        // client only
        f.store
            .put_session(other_trainer, f.client.id, ago(10), ago(10) + hour, SessionStatus::Completed)
            .await;
        // neither
        f.store
            .put_session(other_trainer, other_client, ago(5), ago(5) + hour, SessionStatus::Completed)
            .await;

        let totals = |stats: &SessionStats| {
            stats.monthly.iter().fold(SessionCounts::default(), |acc, m| SessionCounts {
                total: acc.total + m.counts.total,
                completed: acc.completed + m.counts.completed,
                missed: acc.missed + m.counts.missed,
            })
        };

        let trainer_stats = stats(&f.state, f.trainer.id, Role::Trainer).await.unwrap();
        assert_eq!(totals(&trainer_stats), SessionCounts { total: 3, completed: 1, missed: 1 });
        assert_eq!(
            trainer_stats.weekly.iter().map(|w| w.counts.total).sum::<u32>(),
            3
        );

        let client_stats = stats(&f.state, f.client.id, Role::Client).await.unwrap();
        assert_eq!(totals(&client_stats), SessionCounts { total: 2, completed: 2, missed: 0 });
    }
}
