// Module declarations
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

// Re-export CONFIG for use in other modules
pub use app_config::CONFIG;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    app::AppState,
    db::{create_diesel_pool, mask_connection_string, DieselDatabaseConfig, RedisPool},
    handlers::{auth_routes, post_routes},
    realtime::{notifications_ws, ConnectionRegistry, EventRouter},
    services::{RateLimitService, SessionService, TokenService},
};

/// Interval between refresh-record purge runs
const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Handle version flag for Docker health checks - must be FIRST
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--version" {
        println!("chirp-backend v{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chirp_backend_core=debug,axum=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize centralized config (loads all env vars ONCE)
    let config = crate::app_config::config();
    let bind_address = config.bind_address.clone();
    info!("=== STARTING CHIRP BACKEND API ===");
    info!("Starting chirp backend on {}", bind_address);

    // Initialize Diesel database pool
    info!("Initializing database pool...");
    let db_config = DieselDatabaseConfig::default();
    info!("Database URL: {}", mask_connection_string(&db_config.url));

    let max_connections = db_config.max_connections;
    let diesel_pool = match create_diesel_pool(db_config).await {
        Ok(pool) => {
            info!("✓ Database connection pool initialized successfully");
            pool
        },
        Err(e) => {
            error!("✗ Failed to initialize database pool: {}", e);
            return Err(anyhow::anyhow!("Database initialization failed: {}", e));
        },
    };

    // Run embedded migrations
    if crate::migrations::should_run_migrations() {
        info!("Running embedded migrations...");
        match crate::migrations::run_all_migrations(&diesel_pool).await {
            Ok(()) => info!("✓ All migrations completed successfully"),
            Err(e) => {
                error!("✗ Migration failed: {}", e);
                return Err(anyhow::anyhow!("Migration failed: {}", e));
            },
        }
    } else {
        info!("Embedded migrations disabled - using external migration scripts");
    }

    // Initialize Redis
    info!("Initializing Redis connection...");
    let redis_pool = match RedisPool::new(
        &config.redis_url,
        Duration::from_secs(config.redis_connection_timeout),
        Duration::from_secs(config.redis_command_timeout),
    )
    .await
    {
        Ok(pool) => {
            info!("✓ Redis connection initialized successfully");
            pool
        },
        Err(e) => {
            error!("✗ Failed to initialize Redis connection: {}", e);
            return Err(anyhow::anyhow!("Redis initialization failed: {}", e));
        },
    };

    // Initialize token service
    info!("Initializing token service...");
    let token_service = Arc::new(TokenService::from_env());
    info!("✓ Token service initialized successfully");

    // Initialize rate limiting
    let rate_limit_service = Arc::new(RateLimitService::new(redis_pool.clone()));
    info!("✓ Rate limiting service initialized successfully");

    // Initialize the realtime fabric: registry first, then the router that
    // fans out into it
    let registry = ConnectionRegistry::new();
    let event_router = EventRouter::spawn(registry);
    info!("✓ Realtime event router started");

    // Initialize session service with the router as its revocation notifier
    let session_service = Arc::new(SessionService::new(
        diesel_pool.clone(),
        Arc::clone(&token_service),
        Arc::new(event_router.clone()),
        config.security.refresh_expiry_days,
    ));
    info!("✓ Session service initialized successfully");

    // Create shared application state
    let app_state = AppState {
        config: Arc::new(config.clone()),
        diesel_pool: diesel_pool.clone(),
        redis_pool: redis_pool.clone(),
        token_service,
        session_service: Arc::clone(&session_service),
        rate_limit_service,
        event_router,
        max_connections,
    };

    // Configure CORS
    let cors = if config.cors_allowed_origins.iter().any(|o| o == "*") {
        if config.is_production() {
            warn!("CORS: wildcard origin configured in production");
        }
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Build the application router
    let app = Router::new()
        .route("/v1/health", get(comprehensive_health_check))
        .nest("/v1/auth", auth_routes(app_state.clone()))
        .nest("/v1/posts", post_routes(app_state.clone()))
        // Realtime upgrade authenticates inside the handler so auth failures
        // surface as a policy-violation close code
        .route("/v1/notifications/ws", get(notifications_ws))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(app_state);

    // Periodic purge of fully lapsed refresh records
    let purge_service = Arc::clone(&session_service);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match purge_service.purge_expired().await {
                Ok(0) => {},
                Ok(purged) => info!("Purged {} expired refresh records", purged),
                Err(e) => warn!("Refresh record purge failed: {}", e),
            }
        }
    });
    info!("Refresh record purge task started");

    // Parse and bind to address
    let addr: SocketAddr = bind_address.parse()?;
    info!("Starting HTTP server on {}...", addr);

    // Create the server with ConnectInfo support for client IP tracking
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

// Health check handler
async fn comprehensive_health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl axum::response::IntoResponse {
    use axum::http::StatusCode;
    use axum::Json;
    use serde_json::json;

    let mut overall_healthy = true;
    let timestamp = chrono::Utc::now().to_rfc3339();

    // Diesel/PostgreSQL health check
    let postgres_health = match db::check_diesel_health(&state.diesel_pool).await {
        Ok(_) => json!({
            "status": "healthy",
            "max_connections": state.max_connections,
            "error": null
        }),
        Err(e) => {
            overall_healthy = false;
            json!({
                "status": "unhealthy",
                "error": format!("Database connection failed: {}", e)
            })
        },
    };

    // Redis health check
    let redis_health_result = state.redis_pool.health_check().await;
    if !redis_health_result.is_healthy {
        overall_healthy = false;
    }
    let redis_health = json!({
        "status": if redis_health_result.is_healthy { "healthy" } else { "unhealthy" },
        "latency_ms": redis_health_result.latency_ms,
        "error": redis_health_result.error
    });

    let response = json!({
        "status": if overall_healthy { "healthy" } else { "degraded" },
        "service": "chirp-backend",
        "timestamp": timestamp,
        "components": {
            "postgresql": postgres_health,
            "redis": redis_health,
            "realtime": json!({
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
