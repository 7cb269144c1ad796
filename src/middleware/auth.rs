// Authenticated principal extracted from a verified access credential

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::auth::AccessTokenClaims;

/// The principal for the current request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub display_name: String,
    pub username: String,
    /// Credential issued-at, epoch seconds
    pub issued_at: u64,
    /// Credential expiry, epoch seconds
    pub expires_at: u64,
}

impl CurrentUser {
    /// Build from verified claims; fails if the subject is not a UUID
    pub fn from_claims(claims: &AccessTokenClaims) -> Option<Self> {
        let user_id = Uuid::parse_str(&claims.sub).ok()?;
        Some(Self {
            user_id,
            display_name: claims.name.clone(),
            username: claims.username.clone(),
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }

    /// Issued-at in epoch millis, for comparison against password_changed_at
    pub fn issued_at_ms(&self) -> i64 {
        (self.issued_at as i64) * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_claims() {
        let id = Uuid::new_v4();
        let claims = AccessTokenClaims {
            sub: id.to_string(),
            name: "Alice".to_string(),
            username: "alice".to_string(),
            aud: "chirp.social".to_string(),
            iss: "chirp.social".to_string(),
            iat: 1_700_000_000,
            exp: 1_700_000_180,
        };

        let user = CurrentUser::from_claims(&claims).unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.issued_at_ms(), 1_700_000_000_000);
    }

    #[test]
    fn test_from_claims_rejects_non_uuid_subject() {
        let claims = AccessTokenClaims {
            sub: "not-a-uuid".to_string(),
            name: "Alice".to_string(),
            username: "alice".to_string(),
            aud: "chirp.social".to_string(),
            iss: "chirp.social".to_string(),
            iat: 0,
            exp: 0,
        };
        assert!(CurrentUser::from_claims(&claims).is_none());
    }
}
