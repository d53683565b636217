use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A connection pool could not be built.
    #[error("Pool creation error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A column could not be decoded from a row.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// The caller could not be authenticated.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The caller is authenticated but not allowed to do this.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Malformed or missing input.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        details: Option<Vec<String>>,
    },

    /// A uniqueness or non-overlap rule was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A booking or completion time window was violated.
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// An illegal state transition.
    #[error("Invalid state: {0}")]
    State(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Creates a validation error without field details.
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            details: None,
        }
    }

    /// Converts a garde report into a validation error carrying one entry per field.
    pub fn from_report(report: garde::Report) -> Self {
        let details = report
            .iter()
            .map(|(path, error)| format!("{}: {}", path, error))
            .collect();
        AppError::Validation {
            message: "Validation error".to_string(),
            details: Some(details),
        }
    }

    /// Maps a database error, turning constraint violations into business errors.
    ///
    /// Exclusion and unique violations become `Conflict` with the given message,
    /// check violations become `Validation`.
    pub fn from_constraint(err: tokio_postgres::Error, conflict_message: &str) -> Self {
        match err.code() {
            Some(code)
                if *code == SqlState::EXCLUSION_VIOLATION || *code == SqlState::UNIQUE_VIOLATION =>
            {
                AppError::Conflict(conflict_message.to_string())
            }
            Some(code) if *code == SqlState::CHECK_VIOLATION => {
                AppError::validation(format!("Constraint violated: {}", err))
            }
            _ => AppError::Database(err),
        }
    }

    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::CreatePool(e) => {
                tracing::error!("Pool creation error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::MissingData(column) => {
                tracing::error!("Row decoding failed for column: {}", column);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Authentication(msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            AppError::Forbidden(msg) => {
                tracing::warn!("Forbidden: {}", msg);
                (StatusCode::FORBIDDEN, msg.clone())
            }

            AppError::NotFound(msg) => {
                tracing::debug!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, msg.clone())
            }

            AppError::Validation { message, .. } => {
                tracing::debug!("Validation error: {}", message);
                (StatusCode::BAD_REQUEST, message.clone())
            }

            AppError::Conflict(msg) => {
                tracing::debug!("Conflict: {}", msg);
                (StatusCode::CONFLICT, msg.clone())
            }

            AppError::Scheduling(msg) => {
                tracing::debug!("Scheduling rule rejected request: {}", msg);
                (StatusCode::CONFLICT, msg.clone())
            }

            AppError::State(msg) => {
                tracing::debug!("Invalid state transition: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        let error = match self {
            AppError::Validation {
                details: Some(details),
                ..
            } => sonic_rs::json!({ "message": message, "details": details }),
            _ => sonic_rs::json!({ "message": message }),
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({ "error": error }))
            .unwrap_or_else(|_| r#"{"error":{"message":"Internal server error"}}"#.to_string());

        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
