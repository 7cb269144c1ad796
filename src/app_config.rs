// Centralized configuration management for the chirp backend core.
// Load ALL env vars ONCE at startup.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Global application configuration loaded once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    // For tests, load .env file first
    #[cfg(test)]
    dotenv::dotenv().ok();

    AppConfig::from_env().expect("Failed to load configuration")
});

/// Access the global configuration
pub fn config() -> &'static AppConfig {
    &CONFIG
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // Server
    pub bind_address: String,
    pub port: u16,
    pub environment: Environment,
    pub rust_log: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_min_connections: u32,
    pub database_connect_timeout: u64,
    pub database_idle_timeout: u64,
    pub database_max_lifetime: u64,

    // Redis
    pub redis_url: String,
    pub redis_connection_timeout: u64,
    pub redis_command_timeout: u64,

    // Features
    pub enable_rate_limiting: bool,
    pub disable_embedded_migrations: bool,
    pub cors_allowed_origins: Vec<String>,

    // Nested configs
    pub jwt: JwtSettings,
    pub security: SecuritySettings,
}

/// Environment type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "test" => Environment::Test,
            "staging" | "stage" => Environment::Staging,
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Access-credential signing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    pub access_secret: String,
    /// Access-credential lifetime in milliseconds
    pub access_expiry_ms: u64,
    pub audience: String,
    pub issuer: String,
    pub key_version: u32,
}

/// Security settings for the session core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// HMAC key for refresh-secret hashing. Rotating it invalidates every
    /// outstanding refresh secret.
    pub refresh_hash_key: String,
    /// Refresh record lifetime in days
    pub refresh_expiry_days: i64,

    // Per-IP fixed-window rate limits
    pub login_rate_limit_per_ip: u32,
    pub login_rate_limit_window_seconds: u32,
    pub refresh_rate_limit_per_ip: u32,
    pub refresh_rate_limit_window_seconds: u32,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let get_required = |key: &str| -> Result<String, ConfigError> {
            env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
        };

        let get_or_default = |key: &str, default: &str| -> String {
            env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let parse_or_default = |key: &str, default: &str| -> Result<u32, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u32".to_string())
            })
        };

        let parse_u64_or_default = |key: &str, default: &str| -> Result<u64, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u64".to_string())
            })
        };

        let parse_bool_or_default = |key: &str, default: &str| -> bool {
            get_or_default(key, default).to_lowercase() == "true"
        };

        let bind_address = get_or_default("BIND_ADDRESS", "0.0.0.0:8080");
        let port = bind_address
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let environment_str = get_or_default("ENVIRONMENT", "development");
        let environment = Environment::from(environment_str);

        let jwt_access_secret = get_required("JWT_ACCESS_SECRET")?;
        if jwt_access_secret.len() < 32 {
            return Err(ConfigError::InvalidValue(
                "JWT_ACCESS_SECRET".to_string(),
                "Secret must be at least 32 characters long".to_string(),
            ));
        }

        let refresh_hash_key = get_required("REFRESH_HASH_KEY")?;
        if environment == Environment::Production && refresh_hash_key.len() < 32 {
            return Err(ConfigError::InvalidValue(
                "REFRESH_HASH_KEY".to_string(),
                format!(
                    "Key must be at least 32 bytes in production (current: {} bytes)",
                    refresh_hash_key.len()
                ),
            ));
        }

        let database_url = get_required("DATABASE_URL")?;
        let database_max_connections = parse_or_default("DATABASE_MAX_CONNECTIONS", "100")?;
        let database_min_connections = parse_or_default("DATABASE_MIN_CONNECTIONS", "10")?;
        let database_connect_timeout = parse_u64_or_default("DATABASE_CONNECT_TIMEOUT", "30")?;
        let database_idle_timeout = parse_u64_or_default("DATABASE_IDLE_TIMEOUT", "600")?;
        let database_max_lifetime = parse_u64_or_default("DATABASE_MAX_LIFETIME", "1800")?;

        let redis_url = get_or_default("REDIS_URL", "redis://localhost:6379");
        let redis_connection_timeout = parse_u64_or_default("REDIS_CONNECTION_TIMEOUT", "5")?;
        let redis_command_timeout = parse_u64_or_default("REDIS_COMMAND_TIMEOUT", "5")?;

        let jwt = JwtSettings {
            access_secret: jwt_access_secret,
            access_expiry_ms: parse_u64_or_default("JWT_ACCESS_EXPIRY_MS", "180000")?,
            audience: get_or_default("JWT_AUDIENCE", "chirp.social"),
            issuer: get_or_default("JWT_ISSUER", "chirp.social"),
            key_version: parse_or_default("JWT_KEY_VERSION", "1")?,
        };

        let security = SecuritySettings {
            refresh_hash_key,
            refresh_expiry_days: parse_or_default("REFRESH_EXPIRY_DAYS", "14")? as i64,
            login_rate_limit_per_ip: parse_or_default("LOGIN_RATE_LIMIT_PER_IP", "10")?,
            login_rate_limit_window_seconds: parse_or_default(
                "LOGIN_RATE_LIMIT_WINDOW_SECONDS",
                "60",
            )?,
            refresh_rate_limit_per_ip: parse_or_default("REFRESH_RATE_LIMIT_PER_IP", "30")?,
            refresh_rate_limit_window_seconds: parse_or_default(
                "REFRESH_RATE_LIMIT_WINDOW_SECONDS",
                "60",
            )?,
        };

        let cors_allowed_origins: Vec<String> = get_or_default("CORS_ALLOWED_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        Ok(AppConfig {
            bind_address,
            port,
            environment,
            rust_log: get_or_default("RUST_LOG", "info"),
            database_url,
            database_max_connections,
            database_min_connections,
            database_connect_timeout,
            database_idle_timeout,
            database_max_lifetime,
            redis_url,
            redis_connection_timeout,
            redis_command_timeout,
            enable_rate_limiting: parse_bool_or_default("ENABLE_RATE_LIMITING", "true"),
            disable_embedded_migrations: parse_bool_or_default(
                "DISABLE_EMBEDDED_MIGRATIONS",
                "false",
            ),
            cors_allowed_origins,
            jwt,
            security,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            Environment::from("production".to_string()),
            Environment::Production
        );
        assert_eq!(Environment::from("prod".to_string()), Environment::Production);
        assert_eq!(Environment::from("test".to_string()), Environment::Test);
        assert_eq!(
            Environment::from("anything-else".to_string()),
            Environment::Development
        );
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Production.to_string(), "production");
        assert_eq!(Environment::Development.to_string(), "development");
    }
}
