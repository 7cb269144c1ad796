// Authentication handlers: registration, login, the refresh protocol,
// logout, and the sensitive account routes.

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::{
    app::AppState,
    middleware::auth::CurrentUser,
    models::{
        refresh_token::RevocationReason,
        user::{NewUser, User, UserError},
    },
    services::rate_limit::RateLimitConfig,
    utils::{
        hash_password, log_auth_failure, validate_display_name, validate_email, validate_password,
        validate_username, verify_password, ApiError,
    },
};

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    /// Optional; derived from the email local part when omitted
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountRequest {
    pub password: String,
}

/// Session response for register and login
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSessionResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub token: String,
    pub refresh_token: String,
    /// Access credential TTL in milliseconds
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: String,
}

// =============================================================================
// HELPERS
// =============================================================================

async fn check_ip_rate_limit(
    state: &AppState,
    route: &str,
    addr: &SocketAddr,
    max_requests: u32,
    window_seconds: u32,
) -> Result<(), ApiError> {
    if !state.config.enable_rate_limiting {
        return Ok(());
    }

    let key = format!("{}:ip:{}", route, addr.ip());
    let status = state
        .rate_limit_service
        .check_rate_limit(
            &key,
            &RateLimitConfig {
                max_requests,
                window_seconds,
            },
        )
        .await;

    if status.allowed {
        Ok(())
    } else {
        Err(ApiError::RateLimited {
            retry_after_seconds: status.retry_after.unwrap_or(window_seconds),
        })
    }
}

// =============================================================================
// AUTHENTICATION HANDLERS
// =============================================================================

/// POST /v1/auth/register - create an account and open a session
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = validate_email(&request.email)?;
    validate_password(&request.password)?;
    let display_name = validate_display_name(&request.display_name)?;
    let username = match &request.username {
        Some(raw) => validate_username(raw)?,
        None => crate::utils::username_from_email(&email),
    };

    let password_hash = hash_password(&request.password).map_err(|e| {
        tracing::error!("Password hashing failed: {}", e);
        ApiError::Internal
    })?;

    let mut conn = state.diesel_pool.get().await.map_err(|e| {
        tracing::error!("Failed to get database connection: {}", e);
        ApiError::Internal
    })?;

    let user = User::create(
        &mut conn,
        NewUser {
            email,
            username,
            display_name,
            password_hash,
        },
    )
    .await
    .map_err(|e| match e {
        UserError::AlreadyExists => ApiError::UserExists,
        other => {
            tracing::error!("User creation failed: {}", other);
            ApiError::Internal
        },
    })?;
    drop(conn);

    let tokens = state.session_service.start_session(&user).await?;

    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthSessionResponse {
            id: user.id,
            email: user.email,
            username: user.username,
            display_name: user.display_name,
            token: tokens.access_token,
            refresh_token: tokens.refresh_secret,
            expires_in: tokens.expires_in_ms,
        }),
    ))
}

/// POST /v1/auth/login - authenticate and open a session.
/// The failure response never reveals whether the email or the password
/// was wrong.
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let security = &state.config.security;
    check_ip_rate_limit(
        &state,
        "login",
        &addr,
        security.login_rate_limit_per_ip,
        security.login_rate_limit_window_seconds,
    )
    .await?;

    let email = validate_email(&request.email)?;

    let mut conn = state.diesel_pool.get().await.map_err(|e| {
        tracing::error!("Failed to get database connection: {}", e);
        ApiError::Internal
    })?;

    let user = match User::find_by_email(&mut conn, &email).await {
        Ok(user) => user,
        Err(UserError::NotFound) => {
            log_auth_failure(&email, &addr.ip().to_string(), &ApiError::AuthFailed);
            return Err(ApiError::AuthFailed);
        },
        Err(e) => {
            tracing::error!("Database error during login: {}", e);
            return Err(ApiError::Internal);
        },
    };
    drop(conn);

    let password_ok = verify_password(&request.password, &user.password_hash).map_err(|e| {
        tracing::error!("Password verification failed: {}", e);
        ApiError::Internal
    })?;

    if !password_ok || !user.is_active {
        log_auth_failure(&email, &addr.ip().to_string(), &ApiError::AuthFailed);
        return Err(ApiError::AuthFailed);
    }

    let tokens = state.session_service.start_session(&user).await?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(AuthSessionResponse {
        id: user.id,
        email: user.email,
        username: user.username,
        display_name: user.display_name,
        token: tokens.access_token,
        refresh_token: tokens.refresh_secret,
        expires_in: tokens.expires_in_ms,
    }))
}

/// POST /v1/auth/refresh - rotate a refresh secret for a new token pair
pub async fn refresh_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let security = &state.config.security;
    check_ip_rate_limit(
        &state,
        "refresh",
        &addr,
        security.refresh_rate_limit_per_ip,
        security.refresh_rate_limit_window_seconds,
    )
    .await?;

    let tokens = state.session_service.refresh(&request.refresh_token).await?;

    Ok(Json(TokenResponse {
        token: tokens.access_token,
        refresh_token: tokens.refresh_secret,
        expires_in: tokens.expires_in_ms,
    }))
}

/// POST /v1/auth/logout - retire the presented refresh secret's family
pub async fn logout(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.session_service.logout(&request.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/auth/me - current principal (strong auth)
pub async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.diesel_pool.get().await.map_err(|e| {
        tracing::error!("Failed to get database connection: {}", e);
        ApiError::Internal
    })?;

    let db_user = User::find_by_id(&mut conn, user.user_id)
        .await
        .map_err(|e| match e {
            UserError::NotFound => ApiError::SessionRevoked,
            other => {
                tracing::error!("User lookup failed: {}", other);
                ApiError::Internal
            },
        })?;

    Ok(Json(MeResponse {
        id: db_user.id,
        email: db_user.email,
        username: db_user.username,
        display_name: db_user.display_name,
    }))
}

/// POST /v1/auth/change-password (sensitive) - verify the current password,
/// store the new hash, and force every other session out.
pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_password(&request.new_password)?;

    let mut conn = state.diesel_pool.get().await.map_err(|e| {
        tracing::error!("Failed to get database connection: {}", e);
        ApiError::Internal
    })?;

    let db_user = User::find_by_id(&mut conn, user.user_id)
        .await
        .map_err(|_| ApiError::SessionRevoked)?;

    let current_ok =
        verify_password(&request.current_password, &db_user.password_hash).map_err(|e| {
            tracing::error!("Password verification failed: {}", e);
            ApiError::Internal
        })?;
    if !current_ok {
        return Err(ApiError::AuthFailed);
    }

    let new_hash = hash_password(&request.new_password).map_err(|e| {
        tracing::error!("Password hashing failed: {}", e);
        ApiError::Internal
    })?;

    let now_ms = chrono::Utc::now().timestamp_millis();
    User::update_password(&mut conn, user.user_id, &new_hash, now_ms)
        .await
        .map_err(|e| {
            tracing::error!("Password update failed: {}", e);
            ApiError::Internal
        })?;
    drop(conn);

    // Existing refresh families die and every live connection is told;
    // outstanding access credentials keep working on non-sensitive routes
    // until they expire.
    state
        .session_service
        .revoke_all_for_user(user.user_id, RevocationReason::PasswordChanged)
        .await?;

    tracing::info!(user_id = %user.user_id, "Password changed, sessions revoked");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/auth/force-logout (sensitive) - end every session everywhere.
/// Also the entry point for administrative revocation.
pub async fn force_logout(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state.session_service.force_logout(user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/auth/delete-account (sensitive) - deactivate the account and end
/// every session.
pub async fn delete_account(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<DeleteAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.diesel_pool.get().await.map_err(|e| {
        tracing::error!("Failed to get database connection: {}", e);
        ApiError::Internal
    })?;

    let db_user = User::find_by_id(&mut conn, user.user_id)
        .await
        .map_err(|_| ApiError::SessionRevoked)?;

    let password_ok = verify_password(&request.password, &db_user.password_hash).map_err(|e| {
        tracing::error!("Password verification failed: {}", e);
        ApiError::Internal
    })?;
    if !password_ok {
        return Err(ApiError::AuthFailed);
    }

    User::deactivate(&mut conn, user.user_id).await.map_err(|e| {
        tracing::error!("Account deactivation failed: {}", e);
        ApiError::Internal
    })?;
    drop(conn);

    state
        .session_service
        .revoke_all_for_user(user.user_id, RevocationReason::AdminForce)
        .await?;

    tracing::info!(user_id = %user.user_id, "Account deleted");

    Ok(StatusCode::NO_CONTENT)
}
