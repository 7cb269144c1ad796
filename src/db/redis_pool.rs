// Redis connection manager wrapper.
// A single multiplexed ConnectionManager handles reconnection internally;
// clones share the underlying connection.

use redis::{aio::ConnectionManager, Client, RedisError};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;

/// Health check status for Redis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisHealth {
    pub is_healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Redis connection pool manager
#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl RedisPool {
    /// Connect to Redis and establish the managed connection
    pub async fn new(
        url: &str,
        connection_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, RedisError> {
        info!("Redis URL: {}", mask_redis_url(url));

        let client = Client::open(url)?;
        let manager =
            tokio::time::timeout(connection_timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| {
                    RedisError::from((redis::ErrorKind::IoError, "Redis connection timed out"))
                })??;

        info!("Redis connection manager initialized");
        Ok(Self {
            manager,
            command_timeout,
        })
    }

    /// Get a handle to the shared managed connection
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Ping Redis and report latency
    pub async fn health_check(&self) -> RedisHealth {
        let start = Instant::now();
        let mut conn = self.connection();

        let ping = tokio::time::timeout(
            self.command_timeout,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await;

        match ping {
            Ok(Ok(_)) => RedisHealth {
                is_healthy: true,
                latency_ms: start.elapsed().as_millis() as u64,
                error: None,
            },
            Ok(Err(e)) => RedisHealth {
                is_healthy: false,
                latency_ms: start.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            },
            Err(_) => RedisHealth {
                is_healthy: false,
                latency_ms: self.command_timeout.as_millis() as u64,
                error: Some("PING timed out".to_string()),
            },
        }
    }
}

/// Mask Redis URL credentials for logging
fn mask_redis_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let host = parsed.host_str().unwrap_or("***");
        let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
        if parsed.password().is_some() {
            format!("redis://***@{}{}", host, port)
        } else {
            format!("redis://{}{}", host, port)
        }
    } else {
        "redis://***".to_string()
    }
}
