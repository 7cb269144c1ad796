// Refresh record database model.
//
// One row per issued refresh secret. Rows descending from one login share a
// family_id and are ordered by a strictly increasing version; at most one row
// per family is ACTIVE at any instant. This module is the sole gateway to the
// refresh_tokens table; the rotation engine drives state changes exclusively
// through the atomic primitives below.
//
// SECURITY NOTICE: raw refresh secrets are never stored. Only the keyed
// HMAC-SHA-256 digest (hex) lands in token_hash; rotating the HMAC key
// invalidates every outstanding refresh secret.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::{AsExpression, FromSqlRow};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::schema::refresh_tokens;

/// Refresh record lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, AsExpression, FromSqlRow)]
#[diesel(sql_type = diesel::sql_types::Text)]
pub enum RefreshStatus {
    Active,
    Rotated,
    FamilyRevoked,
    Expired,
}

impl RefreshStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStatus::Active => "active",
            RefreshStatus::Rotated => "rotated",
            RefreshStatus::FamilyRevoked => "family_revoked",
            RefreshStatus::Expired => "expired",
        }
    }
}

impl FromStr for RefreshStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RefreshStatus::Active),
            "rotated" => Ok(RefreshStatus::Rotated),
            "family_revoked" => Ok(RefreshStatus::FamilyRevoked),
            "expired" => Ok(RefreshStatus::Expired),
            _ => Err(format!("Invalid refresh status: {}", s)),
        }
    }
}

/// Why a record left the ACTIVE state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, AsExpression, FromSqlRow)]
#[diesel(sql_type = diesel::sql_types::Text)]
pub enum RevocationReason {
    Rotation,
    ReuseAttack,
    UserLogout,
    PasswordChanged,
    AdminForce,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Rotation => "rotation",
            RevocationReason::ReuseAttack => "reuse_attack",
            RevocationReason::UserLogout => "user_logout",
            RevocationReason::PasswordChanged => "password_changed",
            RevocationReason::AdminForce => "admin_force",
        }
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rotation" => Ok(RevocationReason::Rotation),
            "reuse_attack" => Ok(RevocationReason::ReuseAttack),
            "user_logout" => Ok(RevocationReason::UserLogout),
            "password_changed" => Ok(RevocationReason::PasswordChanged),
            "admin_force" => Ok(RevocationReason::AdminForce),
            _ => Err(format!("Invalid revocation reason: {}", s)),
        }
    }
}

macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl<DB> diesel::deserialize::FromSql<diesel::sql_types::Text, DB> for $ty
        where
            DB: diesel::backend::Backend,
            String: diesel::deserialize::FromSql<diesel::sql_types::Text, DB>,
        {
            fn from_sql(bytes: DB::RawValue<'_>) -> diesel::deserialize::Result<Self> {
                let value = String::from_sql(bytes)?;
                Self::from_str(&value).map_err(|e| e.into())
            }
        }

        impl diesel::serialize::ToSql<diesel::sql_types::Text, diesel::pg::Pg> for $ty {
            fn to_sql<'b>(
                &'b self,
                out: &mut diesel::serialize::Output<'b, '_, diesel::pg::Pg>,
            ) -> diesel::serialize::Result {
                <str as diesel::serialize::ToSql<diesel::sql_types::Text, diesel::pg::Pg>>::to_sql(
                    self.as_str(),
                    out,
                )
            }
        }
    };
}

text_enum_sql!(RefreshStatus);
text_enum_sql!(RevocationReason);

/// Refresh record with family tracking
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = refresh_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RefreshRecord {
    pub id: Uuid,
    pub token_hash: String,
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub version: i32,
    pub status: RefreshStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<RevocationReason>,
    pub rotated_to_id: Option<Uuid>,
}

/// New refresh record for insertion
#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshRecord {
    pub token_hash: String,
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub version: i32,
    pub status: RefreshStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Errors for refresh store operations
#[derive(thiserror::Error, Debug)]
pub enum RefreshStoreError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error")]
    Pool(String),
}

impl RefreshRecord {
    /// Insert a new record. Unique indices on token_hash and
    /// (family_id, version) reject hash collisions and forked chains.
    pub async fn save(
        conn: &mut AsyncPgConnection,
        new_record: NewRefreshRecord,
    ) -> Result<Self, RefreshStoreError> {
        use crate::schema::refresh_tokens::dsl::*;

        diesel::insert_into(refresh_tokens)
            .values(&new_record)
            .get_result::<RefreshRecord>(conn)
            .await
            .map_err(RefreshStoreError::Database)
    }

    /// Look up a record by its token hash
    pub async fn find_by_hash(
        conn: &mut AsyncPgConnection,
        hash: &str,
    ) -> Result<Option<Self>, RefreshStoreError> {
        use crate::schema::refresh_tokens::dsl::*;

        refresh_tokens
            .filter(token_hash.eq(hash))
            .first::<RefreshRecord>(conn)
            .await
            .optional()
            .map_err(RefreshStoreError::Database)
    }

    /// Conditionally transition an ACTIVE record to ROTATED.
    ///
    /// Single-row conditional update; the row changes only if it is still
    /// ACTIVE when the update executes, which makes this the linearization
    /// point for concurrent refresh attempts. Returns whether this caller won.
    pub async fn revoke_if_active(
        conn: &mut AsyncPgConnection,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RefreshStoreError> {
        use crate::schema::refresh_tokens::dsl::*;

        let updated = diesel::update(
            refresh_tokens
                .filter(token_hash.eq(hash))
                .filter(status.eq(RefreshStatus::Active)),
        )
        .set((
            status.eq(RefreshStatus::Rotated),
            revoked_at.eq(Some(now)),
            revocation_reason.eq(Some(RevocationReason::Rotation)),
        ))
        .execute(conn)
        .await?;

        Ok(updated > 0)
    }

    /// Link a ROTATED record to its successor
    pub async fn set_rotated_to(
        conn: &mut AsyncPgConnection,
        record_id: Uuid,
        successor_id: Uuid,
    ) -> Result<(), RefreshStoreError> {
        use crate::schema::refresh_tokens::dsl::*;

        diesel::update(refresh_tokens.filter(id.eq(record_id)))
            .set(rotated_to_id.eq(Some(successor_id)))
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Revoke every non-terminal record in a family
    pub async fn revoke_family(
        conn: &mut AsyncPgConnection,
        family: Uuid,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> Result<usize, RefreshStoreError> {
        use crate::schema::refresh_tokens::dsl::*;

        let updated = diesel::update(
            refresh_tokens
                .filter(family_id.eq(family))
                .filter(status.eq_any([RefreshStatus::Active, RefreshStatus::Rotated])),
        )
        .set((
            status.eq(RefreshStatus::FamilyRevoked),
            revoked_at.eq(Some(now)),
            revocation_reason.eq(Some(reason)),
        ))
        .execute(conn)
        .await?;

        Ok(updated)
    }

    /// Most recently revoked record in a family, if any
    pub async fn find_latest_revoked_in_family(
        conn: &mut AsyncPgConnection,
        family: Uuid,
    ) -> Result<Option<Self>, RefreshStoreError> {
        use crate::schema::refresh_tokens::dsl::*;

        refresh_tokens
            .filter(family_id.eq(family))
            .filter(revoked_at.is_not_null())
            .order(revoked_at.desc())
            .first::<RefreshRecord>(conn)
            .await
            .optional()
            .map_err(RefreshStoreError::Database)
    }

    /// Revoke every ACTIVE record across all of a user's families.
    /// Idempotent: a second call matches zero rows.
    pub async fn revoke_all_for_user(
        conn: &mut AsyncPgConnection,
        user: Uuid,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> Result<usize, RefreshStoreError> {
        use crate::schema::refresh_tokens::dsl::*;

        let updated = diesel::update(
            refresh_tokens
                .filter(user_id.eq(user))
                .filter(status.eq(RefreshStatus::Active)),
        )
        .set((
            status.eq(RefreshStatus::FamilyRevoked),
            revoked_at.eq(Some(now)),
            revocation_reason.eq(Some(reason)),
        ))
        .execute(conn)
        .await?;

        Ok(updated)
    }

    /// Delete records whose lifetime has fully lapsed (periodic purge)
    pub async fn cleanup_expired(
        conn: &mut AsyncPgConnection,
        now: DateTime<Utc>,
    ) -> Result<usize, RefreshStoreError> {
        use crate::schema::refresh_tokens::dsl::*;

        let deleted = diesel::delete(refresh_tokens.filter(expires_at.le(now)))
            .execute(conn)
            .await?;

        Ok(deleted)
    }

    /// Check if the record is usable for rotation right now
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == RefreshStatus::Active && self.expires_at > now
    }

    /// Check if the record is past its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Constant-time digest comparison
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(status: RefreshStatus, expires_in: Duration) -> RefreshRecord {
        let now = Utc::now();
        RefreshRecord {
            id: Uuid::new_v4(),
            token_hash: "a".repeat(64),
            user_id: Uuid::new_v4(),
            family_id: Uuid::new_v4(),
            version: 1,
            status,
            created_at: now,
            expires_at: now + expires_in,
            revoked_at: None,
            revocation_reason: None,
            rotated_to_id: None,
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RefreshStatus::Active,
            RefreshStatus::Rotated,
            RefreshStatus::FamilyRevoked,
            RefreshStatus::Expired,
        ] {
            assert_eq!(RefreshStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(RefreshStatus::from_str("bogus").is_err());
    }

    #[test]
    fn test_reason_round_trip() {
        for reason in [
            RevocationReason::Rotation,
            RevocationReason::ReuseAttack,
            RevocationReason::UserLogout,
            RevocationReason::PasswordChanged,
            RevocationReason::AdminForce,
        ] {
            assert_eq!(RevocationReason::from_str(reason.as_str()), Ok(reason));
        }
        assert!(RevocationReason::from_str("bogus").is_err());
    }

    #[test]
    fn test_record_state_checks() {
        let now = Utc::now();

        let active = record(RefreshStatus::Active, Duration::days(14));
        assert!(active.is_active(now));
        assert!(!active.is_expired(now));

        let expired = record(RefreshStatus::Active, Duration::seconds(-1));
        assert!(!expired.is_active(now));
        assert!(expired.is_expired(now));

        let rotated = record(RefreshStatus::Rotated, Duration::days(14));
        assert!(!rotated.is_active(now));
        assert!(!rotated.is_expired(now));
    }

    #[test]
    fn test_hashes_match_constant_time() {
        let a = "f".repeat(64);
        let b = "f".repeat(64);
        let c = format!("{}e", "f".repeat(63));

        assert!(hashes_match(&a, &b));
        assert!(!hashes_match(&a, &c));
        assert!(!hashes_match(&a, "short"));
    }
}
