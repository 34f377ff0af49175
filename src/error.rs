//! Hub error types with HTTP status code mapping.
//!
//! [`HubError`] is the central error type of the service. Each variant
//! maps to a specific HTTP status code and structured JSON error response.
//! Inside the real-time path errors never escape a single connection or
//! event: the pumps and the reconciler log them and carry on.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{RoomId, UserId};

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "room not found: 6f1c...",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Validation/Auth | 400 Bad Request / 401        |
/// | 2000–2999 | State/Not Found | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server          | 500 / 503                    |
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Room with the given ID does not exist.
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// Room exists but has been closed.
    #[error("room is closed: {0}")]
    RoomInactive(RoomId),

    /// Room reached its member capacity.
    #[error("room is full: {0}")]
    RoomFull(RoomId),

    /// User holds no membership row in the room.
    #[error("user {user_id} is not a member of room {room_id}")]
    MembershipNotFound {
        /// Room that was queried.
        room_id: RoomId,
        /// User that was queried.
        user_id: UserId,
    },

    /// Token was valid but no profile exists for the user.
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, malformed, or expired access token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Room Store failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The hub event loop is no longer accepting events.
    #[error("hub is not running")]
    HubUnavailable,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Unauthorized(_) => 1002,
            Self::RoomNotFound(_) => 2001,
            Self::MembershipNotFound { .. } => 2002,
            Self::UserNotFound(_) => 2003,
            Self::RoomInactive(_) => 2004,
            Self::RoomFull(_) => 2005,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::HubUnavailable => 3002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RoomNotFound(_) | Self::MembershipNotFound { .. } | Self::UserNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::RoomInactive(_) | Self::RoomFull(_) => StatusCode::CONFLICT,
            Self::PersistenceError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::HubUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<sqlx::Error> for HubError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
