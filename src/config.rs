use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server backing realtime rooms. `None` keeps rooms in-process.
    pub redis_url: Option<String>,
    /// The HMAC secret used to verify access tokens.
    pub jwt_secret: Zeroizing<String>,
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Origins allowed by CORS.
    pub cors_origins: Vec<String>,
    /// How often lapsed sessions are swept to `missed`.
    pub missed_sweep_interval: Duration,
    /// Capacity of the notification queue.
    pub notification_queue_capacity: usize,
    /// Timeout applied to each notification delivery attempt.
    pub notification_timeout: Duration,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < 16 {
            anyhow::bail!("JWT_SECRET must be at least 16 characters");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            jwt_secret: Zeroizing::new(jwt_secret),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:4000".to_string())
                .parse()
                .context("Invalid BIND_ADDR")?,
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173".to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            missed_sweep_interval: Duration::from_secs(
                env::var("MISSED_SWEEP_INTERVAL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .context("Invalid MISSED_SWEEP_INTERVAL_SECS")?,
            ),
            notification_queue_capacity: env::var("NOTIFICATION_QUEUE_CAPACITY")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()
                .context("Invalid NOTIFICATION_QUEUE_CAPACITY")?,
            notification_timeout: Duration::from_millis(
                env::var("NOTIFICATION_TIMEOUT_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .context("Invalid NOTIFICATION_TIMEOUT_MS")?,
            ),
        })
    }
}
