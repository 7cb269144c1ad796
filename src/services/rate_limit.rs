// Redis-backed fixed-window rate limiting for the auth surface.
// Fails open: a Redis outage must never lock users out of login/refresh.

use redis::AsyncCommands;
use tracing::warn;

use crate::db::RedisPool;

/// Limits for one window
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u32,
}

/// Outcome of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after: Option<u32>,
}

impl RateLimitStatus {
    fn allowed(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
        }
    }
}

/// Fixed-window counter per key (INCR + EXPIRE on first hit)
pub struct RateLimitService {
    redis_pool: RedisPool,
}

impl RateLimitService {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }

    /// Count a hit against `key` and report whether it is within limits.
    /// Redis failures log a warning and allow the request.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> RateLimitStatus {
        let mut conn = self.redis_pool.connection();
        let redis_key = format!("ratelimit:{}", key);

        let outcome = tokio::time::timeout(self.redis_pool.command_timeout(), async {
            let count: u32 = conn.incr(&redis_key, 1u32).await?;
            if count == 1 {
                let _: () = conn.expire(&redis_key, config.window_seconds as i64).await?;
            }
            let ttl: i64 = conn.ttl(&redis_key).await?;
            Ok::<(u32, i64), redis::RedisError>((count, ttl))
        })
        .await;

        match outcome {
            Ok(Ok((count, ttl))) => {
                if count > config.max_requests {
                    RateLimitStatus {
                        allowed: false,
                        remaining: 0,
                        retry_after: Some(ttl.max(1) as u32),
                    }
                } else {
                    RateLimitStatus::allowed(config.max_requests - count)
                }
            },
            Ok(Err(e)) => {
                warn!("Rate limit check failed for {}: {}", key, e);
                RateLimitStatus::allowed(config.max_requests)
            },
            Err(_) => {
                warn!("Rate limit check timed out for {}", key);
                RateLimitStatus::allowed(config.max_requests)
            },
        }
    }
}
