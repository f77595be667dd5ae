// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Domain error taxonomy and its HTTP mapping.
//!
//! Services return [`IdentityError`]; handlers convert it into [`ApiError`]
//! at the boundary. Storage and graph failures become opaque 500s and are
//! logged with their cause.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::auth::AuthError;
use crate::edges::EdgeError;
use crate::storage::EntityStoreError;

// =============================================================================
// Domain errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// `retry_after` is the remaining wait before the operation may succeed.
    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] EntityStoreError),

    #[error(transparent)]
    Edge(#[from] EdgeError),
}

impl IdentityError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

// =============================================================================
// HTTP boundary
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after: Option<Duration>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: message.into(),
            retry_after,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::BadRequest(m) => ApiError::bad_request(m),
            IdentityError::Unauthorized(m) => ApiError::unauthorized(m),
            IdentityError::Forbidden(m) => ApiError::forbidden(m),
            IdentityError::NotFound(m) => ApiError::not_found(m),
            IdentityError::RateLimited {
                message,
                retry_after,
            } => ApiError::rate_limited(message, retry_after),
            IdentityError::Conflict(m) => ApiError::conflict(m),
            IdentityError::Internal(m) => {
                error!(error = %m, "Internal error");
                ApiError::internal("Internal server error")
            }
            IdentityError::Store(e) => {
                error!(error = %e, "Entity store failure");
                ApiError::internal("Internal server error")
            }
            IdentityError::Edge(EdgeError::InvalidQuery(m)) => ApiError::bad_request(m),
            IdentityError::Edge(e) => {
                error!(error = %e, "Edge service failure");
                ApiError::internal("Internal server error")
            }
        }
    }
}

impl From<EdgeError> for ApiError {
    fn from(err: EdgeError) -> Self {
        IdentityError::from(err).into()
    }
}

impl From<EntityStoreError> for ApiError {
    fn from(err: EntityStoreError) -> Self {
        IdentityError::from(err).into()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = err.status_code();
        if status.is_server_error() {
            error!(error = %err, "Authentication backend failure");
            return ApiError::internal("Internal server error");
        }
        ApiError::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after_ms = self.retry_after.map(|d| d.as_millis() as u64);
        let body = Json(ErrorBody {
            error: self.message,
            retry_after_ms,
        });
        let mut response = (self.status, body).into_response();
        if let Some(wait) = self.retry_after {
            // Retry-After is whole seconds; round up so clients never retry early.
            let secs = wait.as_millis().div_ceil(1000);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
