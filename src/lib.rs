// Library exports for the chirp backend core
// This file exposes modules and functions for library consumers

pub mod app;
pub mod app_config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod realtime;
pub mod schema;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use app::AppState;
pub use app_config::{AppConfig, CONFIG};
pub use db::{DieselPool, RedisPool};
pub use middleware::{require_auth, require_fresh_auth, CurrentUser, OptionalUser};
pub use models::auth::AccessTokenClaims;
pub use models::refresh_token::{RefreshRecord, RefreshStatus, RefreshStoreError, RevocationReason};
pub use realtime::{ConnectionRegistry, EventRouter, ServerFrame, Target};
pub use services::{
    SessionError, SessionNotifier, SessionService, SessionTokens, TokenConfig, TokenError,
    TokenService,
};

// Re-export route builders
pub use handlers::{auth_routes, post_routes};

use std::sync::Arc;

/// Initialize the full application state: pools, migrations, services and the
/// realtime fabric. Used by main and by integration harnesses.
pub async fn initialize_app_state() -> Result<AppState, Box<dyn std::error::Error>> {
    use std::time::Duration;
    use tracing::info;

    // Load environment
    dotenv::dotenv().ok();

    let config = app_config::config();

    // Initialize database pool
    info!("Initializing database pool...");
    let db_config = db::DieselDatabaseConfig::default();
    let max_connections = db_config.max_connections;
    let diesel_pool = db::create_diesel_pool(db_config).await?;

    // Run migrations if enabled
    if migrations::should_run_migrations() {
        info!("Running embedded migrations...");
        migrations::run_all_migrations(&diesel_pool)
            .await
            .map_err(|e| format!("Migration failed: {}", e))?;
    }

    // Initialize Redis
    info!("Initializing Redis connection...");
    let redis_pool = db::RedisPool::new(
        &config.redis_url,
        Duration::from_secs(config.redis_connection_timeout),
        Duration::from_secs(config.redis_command_timeout),
    )
    .await?;

    // Initialize services and the realtime fabric
    let token_service = Arc::new(services::TokenService::from_env());
    let rate_limit_service = Arc::new(services::RateLimitService::new(redis_pool.clone()));

    let registry = realtime::ConnectionRegistry::new();
    let event_router = realtime::EventRouter::spawn(registry);

    let session_service = Arc::new(services::SessionService::new(
        diesel_pool.clone(),
        Arc::clone(&token_service),
        Arc::new(event_router.clone()),
        config.security.refresh_expiry_days,
    ));

    Ok(AppState {
        config: Arc::new(config.clone()),
        diesel_pool,
        redis_pool,
        token_service,
        session_service,
        rate_limit_service,
        event_router,
        max_connections,
    })
}

/// Health check handler
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl axum::response::IntoResponse {
    use axum::http::StatusCode;
    use axum::Json;

    let mut overall_healthy = true;
    let timestamp = chrono::Utc::now().to_rfc3339();

    // Check PostgreSQL
    let postgres_health = match db::check_diesel_health(&state.diesel_pool).await {
        Ok(_) => serde_json::json!({
            "status": "healthy",
            "max_connections": state.max_connections,
            "error": null
        }),
        Err(e) => {
            overall_healthy = false;
            serde_json::json!({
                "status": "unhealthy",
                "error": format!("Database connection failed: {}", e)
            })
        },
    };

    // Check Redis
    let redis_health_result = state.redis_pool.health_check().await;
    if !redis_health_result.is_healthy {
        overall_healthy = false;
    }

    let response = serde_json::json!({
        "status": if overall_healthy { "healthy" } else { "degraded" },
        "service": "chirp-backend",
        "timestamp": timestamp,
        "components": {
            "postgresql": postgres_health,
            "redis": serde_json::json!({
                "status": if redis_health_result.is_healthy { "healthy" } else { "unhealthy" },
                "latency_ms": redis_health_result.latency_ms,
                "error": redis_health_result.error
            }),
            "realtime": serde_json::json!({
                "status": "healthy",
                "connections": state.event_router.registry().connection_count()
            })
        }
    });

    if overall_healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
