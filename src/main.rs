use axum::extract::DefaultBodyLimit;
use http::{HeaderValue, Method, header};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod notifier;
mod router;
mod state;

mod crypto {
    pub mod token;
}

mod models {
    pub mod notification;
    pub mod session;
    pub mod trainer_change_request;
    pub mod user;
}

mod repositories {
    #[cfg(test)]
    pub mod memory;
    pub mod notification;
    pub mod session;
    pub mod trainer_change_request;
    pub mod user;
}

mod realtime;

mod services {
    pub mod notifications;
    pub mod sessions;
    pub mod trainer_change_requests;
}

mod handlers {
    pub mod health;
    pub mod notifications;
    pub mod realtime;
    pub mod response;
    pub mod sessions;
    pub mod trainer_change_requests;
}

mod middleware_layer {
    pub mod auth;
}

use config::Config;
use state::AppState;

/// Request bodies are small JSON documents.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("⚠️ Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86400));

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(50)
            .burst_size(200)
            .use_headers()
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let app = router::build_router(state.clone())
        .layer(tower_governor::GovernorLayer::new(governor_conf))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors);

    let sweep_state = state.clone();
    let sweep_interval = config.missed_sweep_interval;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_interval).await;
            tracing::info!("🧹 Sweeping lapsed sessions...");
            match services::sessions::mark_lapsed_sessions(&sweep_state).await {
                Ok(0) => tracing::debug!("No lapsed sessions"),
                Ok(updated) => tracing::info!("✅ Marked {} sessions as missed", updated),
                Err(e) => tracing::error!("❌ Missed-session sweep failed: {}", e),
            }
        }
    });

    let addr = config.bind_addr;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!(
        "✅ Missed-session sweep started (every {}s)",
        sweep_interval.as_secs()
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
