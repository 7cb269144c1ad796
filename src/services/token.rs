// Access-credential issuance and refresh-secret crypto.
//
// Access credentials are short-lived HS256 JWTs; refresh secrets are opaque
// 48-byte random values handed to the client as hex and persisted only as a
// keyed HMAC-SHA-256 digest.

use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::models::auth::AccessTokenClaims;
use crate::models::user::User;

/// Server-side leeway applied uniformly to exp/nbf validation, in seconds
pub const ACCESS_LEEWAY_SECS: u64 = 15;

/// Raw refresh secret length in bytes (96 hex characters on the wire)
pub const REFRESH_SECRET_BYTES: usize = 48;

type HmacSha256 = Hmac<Sha256>;

// Error types for token operations
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token encoding error: {0}")]
    EncodingError(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Clock error: {0}")]
    ClockError(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::TokenExpired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer => TokenError::InvalidToken,
            _ => TokenError::EncodingError(err.to_string()),
        }
    }
}

/// Signing configuration for access credentials plus the refresh HMAC key
#[derive(Clone)]
pub struct TokenConfig {
    /// Access-credential lifetime in milliseconds
    pub access_expiry_ms: u64,
    pub algorithm: Algorithm,

    pub audience: String,
    pub issuer: String,

    pub access_encoding_key: EncodingKey,
    pub access_decoding_key: DecodingKey,

    /// Key for refresh-secret HMAC digests
    pub refresh_hash_key: Vec<u8>,

    // Key versioning for rotation
    pub key_version: u32,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_expiry_ms", &self.access_expiry_ms)
            .field("algorithm", &self.algorithm)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("access_encoding_key", &"<redacted>")
            .field("access_decoding_key", &"<redacted>")
            .field("refresh_hash_key", &"<redacted>")
            .field("key_version", &self.key_version)
            .finish()
    }
}

impl TokenConfig {
    /// Build token config from provided parameters - shared by from_env and for_test
    fn build_from_params(
        access_secret: &str,
        refresh_hash_key: &str,
        access_expiry_ms: u64,
        audience: String,
        issuer: String,
        key_version: u32,
    ) -> Self {
        TokenConfig {
            access_expiry_ms,
            algorithm: Algorithm::HS256,
            audience,
            issuer,
            access_encoding_key: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding_key: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_hash_key: refresh_hash_key.as_bytes().to_vec(),
            key_version,
        }
    }

    /// Create token config from centralized app configuration
    pub fn from_env() -> Self {
        let config = crate::app_config::config();

        Self::build_from_params(
            &config.jwt.access_secret,
            &config.security.refresh_hash_key,
            config.jwt.access_expiry_ms,
            config.jwt.audience.clone(),
            config.jwt.issuer.clone(),
            config.jwt.key_version,
        )
    }

    /// Create token config for tests without touching the global config
    pub fn for_test() -> Self {
        Self::build_from_params(
            "test-access-secret-hs256-at-least-32b",
            "test-refresh-hmac-key-never-use-in-production",
            180_000,
            "test.chirp.social".to_string(),
            "test.chirp.social".to_string(),
            1,
        )
    }
}

/// Credential issuer: signs access credentials and derives refresh digests
pub struct TokenService {
    config: TokenConfig,
}

impl TokenService {
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(TokenConfig::from_env())
    }

    /// Access-credential lifetime in milliseconds
    pub fn access_expiry_ms(&self) -> u64 {
        self.config.access_expiry_ms
    }

    fn now_secs() -> Result<u64, TokenError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| TokenError::ClockError(e.to_string()))
    }

    /// Sign an access credential carrying the user's profile snapshot.
    /// Returns the token and its lifetime in milliseconds. Never blocks on I/O.
    pub fn issue_access(&self, user: &User) -> Result<(String, u64), TokenError> {
        let now = Self::now_secs()?;

        let claims = AccessTokenClaims {
            sub: user.id.to_string(),
            name: user.display_name.clone(),
            username: user.username.clone(),
            aud: self.config.audience.clone(),
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now + self.config.access_expiry_ms / 1000,
        };

        let mut header = Header::new(self.config.algorithm);
        header.kid = Some(self.config.key_version.to_string());

        let token = encode(&header, &claims, &self.config.access_encoding_key)?;
        Ok((token, self.config.access_expiry_ms))
    }

    /// Validate an access credential and return the decoded claims.
    ///
    /// The 15 s leeway covers exp and nbf uniformly; iat is not bound-checked
    /// beyond the sensitive-route comparison against password_changed_at.
    pub fn verify_access(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        let mut validation = Validation::new(self.config.algorithm);
        validation.set_audience(&[self.config.audience.clone()]);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = ACCESS_LEEWAY_SECS;

        let token_data =
            decode::<AccessTokenClaims>(token, &self.config.access_decoding_key, &validation)?;

        Ok(token_data.claims)
    }

    /// Draw a fresh refresh secret: 48 bytes from the OS RNG as 96 hex chars
    pub fn generate_refresh_secret(&self) -> String {
        let mut bytes = [0u8; REFRESH_SECRET_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Keyed HMAC-SHA-256 digest of a raw refresh secret, hex-encoded.
    /// Deterministic; the digest is what lands in storage.
    pub fn hash_refresh(&self, raw: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.config.refresh_hash_key)
            .expect("HMAC accepts keys of any length");
        mac.update(raw.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
