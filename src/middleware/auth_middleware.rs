// Session verification for HTTP routes.
//
// Three resolution modes:
//  - strong (`require_auth`): missing/invalid credential is 401 INVALID_TOKEN
//  - soft (`OptionalUser`): any failure resolves to an anonymous principal;
//    no challenge is ever written, so stale tokens cannot break public reads
//  - sensitive (`require_fresh_auth`): strong plus a database re-read of the
//    user and password_changed_at

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::convert::Infallible;

use crate::{app::AppState, middleware::auth::CurrentUser, models::user::User, utils::ApiError};

/// Pull a bearer token out of the Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Strong resolution: verify the credential or fail with 401
fn resolve_strong(state: &AppState, headers: &HeaderMap) -> Result<CurrentUser, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::InvalidToken)?;
    let claims = state
        .token_service
        .verify_access(token)
        .map_err(|_| ApiError::InvalidToken)?;
    CurrentUser::from_claims(&claims).ok_or(ApiError::InvalidToken)
}

/// Strong middleware: validates the credential and injects CurrentUser
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match resolve_strong(&state, request.headers()) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        },
        Err(e) => {
            tracing::debug!("Access credential rejected: {}", e.code());
            e.into_response()
        },
    }
}

/// A credential is fresh iff it was issued at or after the user's last
/// password change. Both sides in epoch millis.
pub fn credential_is_fresh(password_changed_at_ms: i64, issued_at_ms: i64) -> bool {
    password_changed_at_ms <= issued_at_ms
}

/// Sensitive middleware: strong resolution, then re-check that the user still
/// exists, is active, and has not changed their password since the credential
/// was issued. Comparison is in epoch millis on both sides.
pub async fn require_fresh_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let user = match resolve_strong(&state, request.headers()) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("Failed to get database connection: {}", e);
            return ApiError::Internal.into_response();
        },
    };

    match User::find_by_id(&mut conn, user.user_id).await {
        Ok(db_user) => {
            if !db_user.is_active
                || !credential_is_fresh(db_user.password_changed_at, user.issued_at_ms())
            {
                return ApiError::SessionRevoked.into_response();
            }
        },
        Err(crate::models::user::UserError::NotFound) => {
            return ApiError::SessionRevoked.into_response();
        },
        Err(e) => {
            tracing::error!("Sensitive-route re-check failed: {}", e);
            return ApiError::Internal.into_response();
        },
    }

    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Soft resolution: an optional principal that never rejects.
/// Absent, malformed, forged or expired credentials all resolve to `None`.
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<CurrentUser>);

impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(OptionalUser(resolve_strong(state, &parts.headers).ok()))
    }
}

/// Extractor for CurrentUser injected by require_auth / require_fresh_auth
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(ApiError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_credential_freshness() {
        // Issued after the change: fresh
        assert!(credential_is_fresh(1_000, 2_000));
        // Issued exactly at the change instant: still fresh
        assert!(credential_is_fresh(2_000, 2_000));
        // Issued before the change: revoked
        assert!(!credential_is_fresh(2_001, 2_000));
        // Never changed
        assert!(credential_is_fresh(0, 1));
    }
}
