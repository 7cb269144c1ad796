// Uniform API error handling.
// Every error body carries {code, message, timestamp}; clients branch on
// code, never on message text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::SessionError;

/// API-visible error kinds
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Password does not meet requirements")]
    WeakPassword,

    #[error("Invalid display name")]
    InvalidDisplayName,

    #[error("Invalid username")]
    InvalidUsername,

    #[error("Post content must be 1-500 characters")]
    InvalidContent,

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Refresh token not recognized")]
    RefreshTokenInvalid,

    #[error("Refresh token expired")]
    RefreshTokenExpired,

    #[error("Refresh token reuse detected")]
    TokenReuseDetected,

    #[error("Refresh token superseded; retry with your latest token")]
    StaleRefreshToken,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("An account with this email or username already exists")]
    UserExists,

    #[error("Post not found")]
    PostNotFound,

    #[error("Too many requests")]
    RateLimited { retry_after_seconds: u32 },

    #[error("Internal server error")]
    Internal,
}

/// Uniform error body
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    pub timestamp: i64,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidEmail
            | ApiError::WeakPassword
            | ApiError::InvalidDisplayName
            | ApiError::InvalidUsername
            | ApiError::InvalidContent => StatusCode::BAD_REQUEST,
            ApiError::AuthFailed
            | ApiError::InvalidToken
            | ApiError::RefreshTokenInvalid
            | ApiError::RefreshTokenExpired
            | ApiError::TokenReuseDetected
            | ApiError::SessionRevoked => StatusCode::UNAUTHORIZED,
            ApiError::StaleRefreshToken | ApiError::UserExists => StatusCode::CONFLICT,
            ApiError::PostNotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidEmail => "INVALID_EMAIL",
            ApiError::WeakPassword => "WEAK_PASSWORD",
            ApiError::InvalidDisplayName => "INVALID_DISPLAY_NAME",
            ApiError::InvalidUsername => "INVALID_USERNAME",
            ApiError::InvalidContent => "INVALID_CONTENT",
            ApiError::AuthFailed => "AUTH_FAILED",
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::RefreshTokenInvalid => "REFRESH_TOKEN_INVALID",
            ApiError::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
            ApiError::TokenReuseDetected => "TOKEN_REUSE_DETECTED",
            ApiError::StaleRefreshToken => "STALE_REFRESH_TOKEN",
            ApiError::SessionRevoked => "SESSION_REVOKED",
            ApiError::UserExists => "USER_EXISTS",
            ApiError::PostNotFound => "POST_NOT_FOUND",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ApiErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::RefreshTokenInvalid => ApiError::RefreshTokenInvalid,
            SessionError::RefreshTokenExpired => ApiError::RefreshTokenExpired,
            SessionError::TokenReuseDetected => ApiError::TokenReuseDetected,
            SessionError::StaleRefreshToken => ApiError::StaleRefreshToken,
            // Everything else is an infrastructure fault, not an auth outcome
            SessionError::Token(_)
            | SessionError::Store(_)
            | SessionError::User(_)
            | SessionError::Pool(_) => ApiError::Internal,
        }
    }
}

/// Log an authentication failure with consistent fields
pub fn log_auth_failure(email: &str, ip_address: &str, error: &ApiError) {
    tracing::warn!(
        email = email,
        ip = ip_address,
        error_code = error.code(),
        "Authentication failure"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::refresh_token::RefreshStoreError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::AuthFailed.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::StaleRefreshToken.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::UserExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::TokenReuseDetected.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::InvalidEmail.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Internal.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_session_error_mapping() {
        assert_eq!(
            ApiError::from(SessionError::StaleRefreshToken).code(),
            "STALE_REFRESH_TOKEN"
        );
        assert_eq!(
            ApiError::from(SessionError::TokenReuseDetected).code(),
            "TOKEN_REUSE_DETECTED"
        );
        // Infrastructure faults never surface as auth codes
        assert_eq!(
            ApiError::from(SessionError::Pool("down".into())).code(),
            "INTERNAL_ERROR"
        );
        assert_eq!(
            ApiError::from(SessionError::Store(RefreshStoreError::Pool("down".into()))).code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_error_body_shape() {
        let response_body = ApiErrorBody {
            code: ApiError::SessionRevoked.code().to_string(),
            message: ApiError::SessionRevoked.to_string(),
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&response_body).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["code"], "SESSION_REVOKED");
        assert!(obj["timestamp"].is_i64());
    }
}
