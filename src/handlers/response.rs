use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::{AppError, Result};

/// Paging hints attached to capped listings.
#[derive(Debug, Serialize)]
pub struct Pagination {
    pub limit: i64,
    pub count: usize,
}

/// The success envelope: `{ data, message, pagination }`. Absent parts are omitted.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            data: Some(data),
            message: "OK".to_string(),
            pagination: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn paginated(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Serializes the envelope with the given status.
    pub fn into_response_with(self, status: StatusCode) -> Result<Response> {
        let body = sonic_rs::to_string(&self)
            .map_err(|e| AppError::Internal(format!("Failed to encode response: {}", e)))?;
        Ok((status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
    }

    pub fn ok(self) -> Result<Response> {
        self.into_response_with(StatusCode::OK)
    }

    pub fn created(self) -> Result<Response> {
        self.into_response_with(StatusCode::CREATED)
    }
}

/// An envelope carrying only a message.
pub fn message_only(message: &str) -> Result<Response> {
    Envelope::<()> {
        data: None,
        message: message.to_string(),
        pagination: None,
    }
    .ok()
}
