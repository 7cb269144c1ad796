// Authentication models: access-credential claims.

use serde::{Deserialize, Serialize};

/// Access token claims structure.
/// Carries a snapshot of the user's profile; the snapshot is re-read at
/// rotation so renamed users get fresh claims within one access lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// User ID (subject)
    pub sub: String,

    /// Display name snapshot at issuance
    pub name: String,

    /// Username snapshot at issuance
    pub username: String,

    /// Audience (aud)
    pub aud: String,

    /// Issuer (iss)
    pub iss: String,

    /// Issued at timestamp (Unix epoch seconds)
    pub iat: u64,

    /// Expires at timestamp (Unix epoch seconds)
    pub exp: u64,
}

impl AccessTokenClaims {
    /// Issued-at in epoch millis, for comparison against password_changed_at
    pub fn issued_at_ms(&self) -> i64 {
        (self.iat as i64) * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> AccessTokenClaims {
        AccessTokenClaims {
            sub: "2b0f9f4e-15f9-4cb8-9c38-000000000001".to_string(),
            name: "Alice".to_string(),
            username: "alice".to_string(),
            aud: "chirp.social".to_string(),
            iss: "chirp.social".to_string(),
            iat: 1_700_000_000,
            exp: 1_700_000_180,
        }
    }

    #[test]
    fn test_claims_serialization_round_trip() {
        let original = claims();
        let json = serde_json::to_string(&original).expect("Should serialize");
        let decoded: AccessTokenClaims = serde_json::from_str(&json).expect("Should deserialize");
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_claims_exact_field_set() {
        let json_value = serde_json::to_value(claims()).expect("Should serialize");
        let obj = json_value.as_object().expect("Should be object");

        assert_eq!(obj.len(), 7);
        for key in ["sub", "name", "username", "aud", "iss", "iat", "exp"] {
            assert!(obj.contains_key(key), "missing claim {}", key);
        }
    }

    #[test]
    fn test_issued_at_ms() {
        assert_eq!(claims().issued_at_ms(), 1_700_000_000_000);
    }
}
