// Session lifecycle: login issuance, the atomic refresh protocol, reuse
// detection, and the external revocation triggers.
//
// The refresh path is the subtle part. A presented secret may race a
// concurrent refresh with the same secret; the single-row conditional update
// in the refresh store is the linearization point, and the 10 s grace window
// decides whether a losing presentation is a concurrent-stale client or a
// replayed secret.

use chrono::{DateTime, Duration, Utc};
use diesel_async::AsyncConnection;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DieselPool;
use crate::models::refresh_token::{
    hashes_match, NewRefreshRecord, RefreshRecord, RefreshStatus, RefreshStoreError,
    RevocationReason,
};
use crate::models::user::{User, UserError};
use crate::services::token::{TokenError, TokenService};

/// Interval after a rotation during which a second presentation of the same
/// secret is treated as a concurrent-stale client rather than replay
pub const GRACE_WINDOW_MS: i64 = 10_000;

/// Port into the realtime fabric: push a forced-logout frame to every live
/// connection of a user. Implementations must enqueue and return immediately.
pub trait SessionNotifier: Send + Sync {
    fn auth_revoked(&self, user_id: Uuid, message: &str);
}

/// Notifier for contexts without a realtime fabric (tests, offline tooling)
pub struct NoopNotifier;

impl SessionNotifier for NoopNotifier {
    fn auth_revoked(&self, _user_id: Uuid, _message: &str) {}
}

/// Token triple returned to clients on login, registration and refresh
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_secret: String,
    pub expires_in_ms: u64,
}

/// Business and infrastructure failures of session operations.
/// Business variants map 1:1 to wire error codes; infrastructure variants
/// surface as 500 and never as an auth code.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Refresh token not recognized")]
    RefreshTokenInvalid,

    #[error("Refresh token expired")]
    RefreshTokenExpired,

    #[error("Refresh token reuse detected")]
    TokenReuseDetected,

    #[error("Refresh token superseded by a concurrent rotation")]
    StaleRefreshToken,

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Refresh store error: {0}")]
    Store(#[from] RefreshStoreError),

    #[error("User error: {0}")]
    User(#[from] UserError),

    #[error("Connection pool error: {0}")]
    Pool(String),
}

impl From<diesel::result::Error> for SessionError {
    fn from(e: diesel::result::Error) -> Self {
        SessionError::Store(RefreshStoreError::Database(e))
    }
}

/// How a presentation of a non-ACTIVE record is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseClass {
    /// Within the grace window: a concurrent-stale client, no new tokens,
    /// no family revocation
    ConcurrentStale,
    /// Outside the grace window: a replayed secret, revoke the family
    Replay,
}

/// Classify a non-ACTIVE presentation against the grace window.
/// `revoked_at` is the most recent revocation instant in the family, if any.
pub fn classify_reuse(revoked_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ReuseClass {
    match revoked_at {
        Some(at) if (now - at).num_milliseconds() <= GRACE_WINDOW_MS => ReuseClass::ConcurrentStale,
        _ => ReuseClass::Replay,
    }
}

enum RotationAttempt {
    Issued(SessionTokens),
    /// Lost the conditional update to a concurrent refresher
    Lost,
}

/// Rotation engine. Sole writer of refresh records; reads and mutates them
/// exclusively through the store's atomic primitives.
pub struct SessionService {
    db_pool: DieselPool,
    tokens: Arc<TokenService>,
    notifier: Arc<dyn SessionNotifier>,
    refresh_expiry: Duration,
}

impl SessionService {
    pub fn new(
        db_pool: DieselPool,
        tokens: Arc<TokenService>,
        notifier: Arc<dyn SessionNotifier>,
        refresh_expiry_days: i64,
    ) -> Self {
        Self {
            db_pool,
            tokens,
            notifier,
            refresh_expiry: Duration::days(refresh_expiry_days),
        }
    }

    async fn conn(
        &self,
    ) -> Result<
        bb8::PooledConnection<
            '_,
            diesel_async::pooled_connection::AsyncDieselConnectionManager<
                diesel_async::AsyncPgConnection,
            >,
        >,
        SessionError,
    > {
        self.db_pool
            .get()
            .await
            .map_err(|e| SessionError::Pool(e.to_string()))
    }

    /// Open a new session at login/registration: fresh family, version 1
    pub async fn start_session(&self, user: &User) -> Result<SessionTokens, SessionError> {
        let (access_token, expires_in_ms) = self.tokens.issue_access(user)?;
        let refresh_secret = self.tokens.generate_refresh_secret();
        let now = Utc::now();

        let mut conn = self.conn().await?;
        RefreshRecord::save(
            &mut conn,
            NewRefreshRecord {
                token_hash: self.tokens.hash_refresh(&refresh_secret),
                user_id: user.id,
                family_id: Uuid::new_v4(),
                version: 1,
                status: RefreshStatus::Active,
                created_at: now,
                expires_at: now + self.refresh_expiry,
            },
        )
        .await?;

        Ok(SessionTokens {
            access_token,
            refresh_secret,
            expires_in_ms,
        })
    }

    /// The refresh protocol: validate, atomically rotate, detect reuse.
    pub async fn refresh(&self, raw_secret: &str) -> Result<SessionTokens, SessionError> {
        let hash = self.tokens.hash_refresh(raw_secret);
        let now = Utc::now();

        let mut conn = self.conn().await?;

        let record = RefreshRecord::find_by_hash(&mut conn, &hash)
            .await?
            .ok_or(SessionError::RefreshTokenInvalid)?;

        if !hashes_match(&record.token_hash, &hash) {
            return Err(SessionError::RefreshTokenInvalid);
        }

        if record.is_expired(now) {
            return Err(SessionError::RefreshTokenExpired);
        }
        drop(conn);

        if record.status == RefreshStatus::Active {
            match self.rotate(&record, &hash, now).await? {
                RotationAttempt::Issued(tokens) => return Ok(tokens),
                // A concurrent refresher rotated this record between our read
                // and the conditional update; fall through to stale handling.
                RotationAttempt::Lost => {},
            }
        }

        self.handle_non_active(&record, now).await
    }

    /// Atomic rotation: the conditional revoke, the successor insert and the
    /// chain link commit in one transaction, so a crash mid-rotation cannot
    /// leave a family with zero or two ACTIVE records.
    async fn rotate(
        &self,
        record: &RefreshRecord,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<RotationAttempt, SessionError> {
        let mut conn = self.conn().await?;

        let record_id = record.id;
        let record_user_id = record.user_id;
        let record_family_id = record.family_id;
        let record_version = record.version;
        let hash = hash.to_string();
        let refresh_expiry = self.refresh_expiry;
        let tokens = Arc::clone(&self.tokens);

        conn.transaction::<RotationAttempt, SessionError, _>(|tx| {
            Box::pin(async move {
                let won = RefreshRecord::revoke_if_active(tx, &hash, now).await?;
                if !won {
                    return Ok(RotationAttempt::Lost);
                }

                // Re-read the user so rotated credentials carry current
                // profile names.
                let user = User::find_by_id(tx, record_user_id).await?;

                let (access_token, expires_in_ms) = tokens.issue_access(&user)?;
                let refresh_secret = tokens.generate_refresh_secret();

                let successor = RefreshRecord::save(
                    tx,
                    NewRefreshRecord {
                        token_hash: tokens.hash_refresh(&refresh_secret),
                        user_id: record_user_id,
                        family_id: record_family_id,
                        version: record_version + 1,
                        status: RefreshStatus::Active,
                        created_at: now,
                        expires_at: now + refresh_expiry,
                    },
                )
                .await?;

                RefreshRecord::set_rotated_to(tx, record_id, successor.id).await?;

                Ok(RotationAttempt::Issued(SessionTokens {
                    access_token,
                    refresh_secret,
                    expires_in_ms,
                }))
            })
        })
        .await
    }

    /// A non-ACTIVE record was presented: concurrent-stale inside the grace
    /// window, replay attack outside it.
    async fn handle_non_active(
        &self,
        record: &RefreshRecord,
        now: DateTime<Utc>,
    ) -> Result<SessionTokens, SessionError> {
        let mut conn = self.conn().await?;

        let latest_revoked =
            RefreshRecord::find_latest_revoked_in_family(&mut conn, record.family_id).await?;
        let revoked_at = latest_revoked
            .as_ref()
            .and_then(|r| r.revoked_at)
            .or(record.revoked_at);

        match classify_reuse(revoked_at, now) {
            ReuseClass::ConcurrentStale => {
                // The client should re-read its most recent local tokens and
                // retry once; issuing here would fork the family.
                Err(SessionError::StaleRefreshToken)
            },
            ReuseClass::Replay => {
                warn!(
                    user_id = %record.user_id,
                    family_id = %record.family_id,
                    "Refresh token replay detected, revoking family"
                );

                RefreshRecord::revoke_family(
                    &mut conn,
                    record.family_id,
                    RevocationReason::ReuseAttack,
                    now,
                )
                .await?;

                self.notifier.auth_revoked(
                    record.user_id,
                    "Your session was revoked because a refresh token was reused",
                );

                Err(SessionError::TokenReuseDetected)
            },
        }
    }

    /// Voluntary logout: retire the presented secret's whole family
    pub async fn logout(&self, raw_secret: &str) -> Result<(), SessionError> {
        let hash = self.tokens.hash_refresh(raw_secret);
        let now = Utc::now();

        let mut conn = self.conn().await?;

        let record = RefreshRecord::find_by_hash(&mut conn, &hash)
            .await?
            .ok_or(SessionError::RefreshTokenInvalid)?;

        let revoked = RefreshRecord::revoke_family(
            &mut conn,
            record.family_id,
            RevocationReason::UserLogout,
            now,
        )
        .await?;

        info!(user_id = %record.user_id, revoked, "User logged out, family retired");
        Ok(())
    }

    /// Revoke every active record of a user and push forced logout to all of
    /// their live connections. Used by the password-change handler (which has
    /// already bumped password_changed_at) and by force_logout.
    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        reason: RevocationReason,
    ) -> Result<usize, SessionError> {
        let now = Utc::now();
        let mut conn = self.conn().await?;

        let revoked = RefreshRecord::revoke_all_for_user(&mut conn, user_id, reason, now).await?;

        self.notifier
            .auth_revoked(user_id, "Your session has ended. Please sign in again.");

        info!(user_id = %user_id, revoked, reason = reason.as_str(), "Revoked all sessions");
        Ok(revoked)
    }

    /// Administrative force logout: invalidate outstanding access credentials
    /// on sensitive routes by bumping password_changed_at, then revoke every
    /// refresh record and push forced logout.
    pub async fn force_logout(&self, user_id: Uuid) -> Result<usize, SessionError> {
        let now_ms = Utc::now().timestamp_millis();

        {
            let mut conn = self.conn().await?;
            User::bump_password_changed_at(&mut conn, user_id, now_ms).await?;
        }

        self.revoke_all_for_user(user_id, RevocationReason::AdminForce)
            .await
    }

    /// Periodic purge of fully lapsed records
    pub async fn purge_expired(&self) -> Result<usize, SessionError> {
        let mut conn = self.conn().await?;
        Ok(RefreshRecord::cleanup_expired(&mut conn, Utc::now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grace_window_boundary() {
        let now = Utc::now();

        // Exactly at the window edge: concurrent-stale
        let at_edge = now - Duration::milliseconds(GRACE_WINDOW_MS);
        assert_eq!(
            classify_reuse(Some(at_edge), now),
            ReuseClass::ConcurrentStale
        );

        // One millisecond past: replay
        let past_edge = now - Duration::milliseconds(GRACE_WINDOW_MS + 1);
        assert_eq!(classify_reuse(Some(past_edge), now), ReuseClass::Replay);
    }

    #[test]
    fn test_fresh_revocation_is_stale() {
        let now = Utc::now();
        assert_eq!(
            classify_reuse(Some(now - Duration::seconds(2)), now),
            ReuseClass::ConcurrentStale
        );
    }

    #[test]
    fn test_missing_revocation_instant_is_replay() {
        assert_eq!(classify_reuse(None, Utc::now()), ReuseClass::Replay);
    }
}
