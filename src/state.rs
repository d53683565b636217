use std::sync::Arc;

use crate::{
    config::Config,
    error::Result,
    notifier::{Notifier, NotifierSettings},
    realtime::{LocalBroadcaster, RedisBroadcaster, RoomBroadcaster},
    repositories::{
        notification::{NotificationRepository, PgNotificationRepository},
        session::{PgSessionRepository, SessionRepository},
        trainer_change_request::{PgTrainerChangeRequestRepository, TrainerChangeRequestRepository},
        user::{PgUserRepository, UserRepository},
    },
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// The identity store.
    pub users: Arc<dyn UserRepository>,
    /// The session store.
    pub sessions: Arc<dyn SessionRepository>,
    /// The trainer change request store.
    pub change_requests: Arc<dyn TrainerChangeRequestRepository>,
    /// The notification store.
    pub notifications: Arc<dyn NotificationRepository>,
    /// Per-user realtime rooms.
    pub broadcaster: Arc<dyn RoomBroadcaster>,
    /// Queue for best-effort notifications.
    pub notifier: Notifier,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        crate::db::run_migrations(&db).await?;

        let broadcaster: Arc<dyn RoomBroadcaster> = match &config.redis_url {
            Some(url) => {
                let redis = RedisBroadcaster::connect(url).await?;
                tracing::info!("✅ Redis pub/sub broadcaster initialized");
                Arc::new(redis)
            }
            None => {
                tracing::warn!("⚠️ REDIS_URL not set, realtime rooms are local to this instance");
                Arc::new(LocalBroadcaster::new())
            }
        };

        let notifications: Arc<dyn NotificationRepository> =
            Arc::new(PgNotificationRepository::new(db.clone()));

        let notifier = Notifier::spawn(
            notifications.clone(),
            broadcaster.clone(),
            NotifierSettings {
                queue_capacity: config.notification_queue_capacity,
                attempt_timeout: config.notification_timeout,
                ..Default::default()
            },
        );
        tracing::info!(
            "✅ Notifier initialized (queue capacity {})",
            config.notification_queue_capacity
        );

        Ok(AppState {
            config: config.clone(),
            users: Arc::new(PgUserRepository::new(db.clone())),
            sessions: Arc::new(PgSessionRepository::new(db.clone())),
            change_requests: Arc::new(PgTrainerChangeRequestRepository::new(db)),
            notifications,
            broadcaster,
            notifier,
        })
    }

    /// State backed by one in-memory store, with the notifier queue handed back for inspection.
    #[cfg(test)]
    pub fn in_memory(
        store: Arc<crate::repositories::memory::MemoryStore>,
    ) -> (Self, tokio::sync::mpsc::Receiver<crate::notifier::Dispatch>) {
        use std::time::Duration;
        use zeroize::Zeroizing;

        let (notifier, dispatched) = Notifier::detached(64);
        let config = Config {
            database_url: "postgres://localhost/coachbook_test".to_string(),
            redis_url: None,
            jwt_secret: Zeroizing::new(crate::crypto::token::TEST_SECRET.to_string()),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            cors_origins: vec!["http://localhost:5173".to_string()],
            missed_sweep_interval: Duration::from_secs(3600),
            notification_queue_capacity: 64,
            notification_timeout: Duration::from_millis(100),
        };

        let state = AppState {
            config,
            users: store.clone(),
            sessions: store.clone(),
            change_requests: store.clone(),
            notifications: store,
            broadcaster: Arc::new(LocalBroadcaster::new()),
            notifier,
        };
        (state, dispatched)
    }
}
