// Application state and configuration
use std::sync::Arc;

use crate::{
    app_config::AppConfig,
    db::{DieselPool, RedisPool},
    realtime::EventRouter,
    services::{RateLimitService, SessionService, TokenService},
};

// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub diesel_pool: DieselPool,
    pub redis_pool: RedisPool,
    pub token_service: Arc<TokenService>,
    pub session_service: Arc<SessionService>,
    pub rate_limit_service: Arc<RateLimitService>,
    pub event_router: EventRouter,
    pub max_connections: u32,
}
