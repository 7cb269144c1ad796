// Integration tests for the refresh rotation protocol: chain linearity, the
// single-ACTIVE invariant, the grace window, reuse detection and the
// revocation triggers. Database-gated; each test skips without DATABASE_URL.

mod common;

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serial_test::serial;
use uuid::Uuid;

use chirp_backend_core::models::refresh_token::{RefreshRecord, RefreshStatus, RevocationReason};
use chirp_backend_core::schema::refresh_tokens;
use chirp_backend_core::services::SessionError;

/// Load every record of the family that contains the given token hash
async fn family_records(
    pool: &chirp_backend_core::db::DieselPool,
    token_hash: &str,
) -> Vec<RefreshRecord> {
    let mut conn = pool.get().await.expect("Failed to get connection");

    let record: RefreshRecord = refresh_tokens::table
        .filter(refresh_tokens::token_hash.eq(token_hash))
        .first(&mut conn)
        .await
        .expect("Record should exist");

    refresh_tokens::table
        .filter(refresh_tokens::family_id.eq(record.family_id))
        .order(refresh_tokens::version.asc())
        .load(&mut conn)
        .await
        .expect("Family query should succeed")
}

fn assert_single_active(records: &[RefreshRecord]) {
    let active = records
        .iter()
        .filter(|r| r.status == RefreshStatus::Active)
        .count();
    assert_eq!(active, 1, "family must have exactly one ACTIVE record");
}

#[tokio::test]
#[serial]
async fn test_rotation_chain_linearity() {
    let Some(pool) = common::try_pool().await else {
        return;
    };
    let user = common::create_test_user(&pool).await;
    let (service, _notifier) = common::test_session_service(&pool);
    let tokens = common::test_token_service();

    let first = service.start_session(&user).await.unwrap();
    assert_eq!(first.refresh_secret.len(), 96);
    assert_eq!(first.expires_in_ms, 180_000);

    let second = service.refresh(&first.refresh_secret).await.unwrap();
    assert_ne!(first.refresh_secret, second.refresh_secret);
    let third = service.refresh(&second.refresh_secret).await.unwrap();

    let records = family_records(&pool, &tokens.hash_refresh(&first.refresh_secret)).await;
    assert_eq!(records.len(), 3);
    assert_single_active(&records);

    // Versions strictly increase along the chain
    let versions: Vec<i32> = records.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);

    // Each rotated record links to the record with version + 1
    assert_eq!(records[0].status, RefreshStatus::Rotated);
    assert_eq!(records[0].rotated_to_id, Some(records[1].id));
    assert_eq!(records[0].revocation_reason, Some(RevocationReason::Rotation));
    assert_eq!(records[1].rotated_to_id, Some(records[2].id));
    assert_eq!(records[2].status, RefreshStatus::Active);
    assert_eq!(records[2].rotated_to_id, None);

    // The newest secret is the only usable one
    assert_eq!(
        records[2].token_hash,
        tokens.hash_refresh(&third.refresh_secret)
    );

    common::cleanup_test_user(&pool, user.id).await;
}

#[tokio::test]
#[serial]
async fn test_second_presentation_in_grace_window_is_stale() {
    let Some(pool) = common::try_pool().await else {
        return;
    };
    let user = common::create_test_user(&pool).await;
    let (service, notifier) = common::test_session_service(&pool);
    let tokens = common::test_token_service();

    let first = service.start_session(&user).await.unwrap();
    let _second = service.refresh(&first.refresh_secret).await.unwrap();

    // Same secret again, well inside the grace window
    let outcome = service.refresh(&first.refresh_secret).await;
    assert!(matches!(outcome, Err(SessionError::StaleRefreshToken)));

    // No family revocation, no forced logout, invariant intact
    let records = family_records(&pool, &tokens.hash_refresh(&first.refresh_secret)).await;
    assert_single_active(&records);
    assert!(notifier.revoked_users().is_empty());

    common::cleanup_test_user(&pool, user.id).await;
}

#[tokio::test]
#[serial]
async fn test_concurrent_refreshes_have_one_winner() {
    let Some(pool) = common::try_pool().await else {
        return;
    };
    let user = common::create_test_user(&pool).await;
    let (service, _notifier) = common::test_session_service(&pool);
    let tokens = common::test_token_service();

    let first = service.start_session(&user).await.unwrap();

    let (a, b) = tokio::join!(
        service.refresh(&first.refresh_secret),
        service.refresh(&first.refresh_secret),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one concurrent refresh may win");
    for outcome in [&a, &b] {
        if let Err(e) = outcome {
            assert!(matches!(e, SessionError::StaleRefreshToken), "loser must see STALE, got {e}");
        }
    }

    let records = family_records(&pool, &tokens.hash_refresh(&first.refresh_secret)).await;
    assert_single_active(&records);

    common::cleanup_test_user(&pool, user.id).await;
}

#[tokio::test]
#[serial]
async fn test_replay_after_grace_revokes_family() {
    let Some(pool) = common::try_pool().await else {
        return;
    };
    let user = common::create_test_user(&pool).await;
    let (service, notifier) = common::test_session_service(&pool);
    let tokens = common::test_token_service();

    let first = service.start_session(&user).await.unwrap();
    let _second = service.refresh(&first.refresh_secret).await.unwrap();

    // Backdate the rotation past the grace window instead of sleeping
    let old_hash = tokens.hash_refresh(&first.refresh_secret);
    {
        let mut conn = pool.get().await.unwrap();
        let backdated = Utc::now() - Duration::milliseconds(11_000);
        diesel::update(refresh_tokens::table.filter(refresh_tokens::token_hash.eq(&old_hash)))
            .set(refresh_tokens::revoked_at.eq(Some(backdated)))
            .execute(&mut conn)
            .await
            .unwrap();
    }

    let outcome = service.refresh(&first.refresh_secret).await;
    assert!(matches!(outcome, Err(SessionError::TokenReuseDetected)));

    // Every record in the family is now FAMILY_REVOKED with ReuseAttack
    let records = family_records(&pool, &old_hash).await;
    for record in &records {
        assert_eq!(record.status, RefreshStatus::FamilyRevoked);
        assert_eq!(
            record.revocation_reason,
            Some(RevocationReason::ReuseAttack)
        );
        assert!(record.revoked_at.is_some());
    }

    // Every connection of the user was told
    assert_eq!(notifier.revoked_users(), vec![user.id]);

    // The successor secret is dead too
    let records_active = records
        .iter()
        .filter(|r| r.status == RefreshStatus::Active)
        .count();
    assert_eq!(records_active, 0);

    common::cleanup_test_user(&pool, user.id).await;
}

#[tokio::test]
#[serial]
async fn test_unknown_and_expired_secrets() {
    let Some(pool) = common::try_pool().await else {
        return;
    };
    let user = common::create_test_user(&pool).await;
    let (service, _notifier) = common::test_session_service(&pool);
    let tokens = common::test_token_service();

    // Unknown secret
    let unknown = tokens.generate_refresh_secret();
    assert!(matches!(
        service.refresh(&unknown).await,
        Err(SessionError::RefreshTokenInvalid)
    ));

    // Expired record
    let raw = tokens.generate_refresh_secret();
    {
        use chirp_backend_core::models::refresh_token::NewRefreshRecord;
        let mut conn = pool.get().await.unwrap();
        let created = Utc::now() - Duration::days(15);
        RefreshRecord::save(
            &mut conn,
            NewRefreshRecord {
                token_hash: tokens.hash_refresh(&raw),
                user_id: user.id,
                family_id: Uuid::new_v4(),
                version: 1,
                status: RefreshStatus::Active,
                created_at: created,
                expires_at: created + Duration::days(14),
            },
        )
        .await
        .unwrap();
    }
    assert!(matches!(
        service.refresh(&raw).await,
        Err(SessionError::RefreshTokenExpired)
    ));

    common::cleanup_test_user(&pool, user.id).await;
}

#[tokio::test]
#[serial]
async fn test_logout_retires_family() {
    let Some(pool) = common::try_pool().await else {
        return;
    };
    let user = common::create_test_user(&pool).await;
    let (service, _notifier) = common::test_session_service(&pool);
    let tokens = common::test_token_service();

    let session = service.start_session(&user).await.unwrap();
    service.logout(&session.refresh_secret).await.unwrap();

    let records = family_records(&pool, &tokens.hash_refresh(&session.refresh_secret)).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RefreshStatus::FamilyRevoked);
    assert_eq!(
        records[0].revocation_reason,
        Some(RevocationReason::UserLogout)
    );

    // The retired secret no longer refreshes; a fresh retirement was just now,
    // so this presentation lands in the grace window as stale
    assert!(service.refresh(&session.refresh_secret).await.is_err());

    common::cleanup_test_user(&pool, user.id).await;
}

#[tokio::test]
#[serial]
async fn test_revoke_all_for_user_is_idempotent() {
    let Some(pool) = common::try_pool().await else {
        return;
    };
    let user = common::create_test_user(&pool).await;
    let (service, notifier) = common::test_session_service(&pool);

    // Two devices, two families
    service.start_session(&user).await.unwrap();
    service.start_session(&user).await.unwrap();

    let revoked = service
        .revoke_all_for_user(user.id, RevocationReason::PasswordChanged)
        .await
        .unwrap();
    assert_eq!(revoked, 2);

    // Second run changes nothing beyond the first
    let revoked_again = service
        .revoke_all_for_user(user.id, RevocationReason::PasswordChanged)
        .await
        .unwrap();
    assert_eq!(revoked_again, 0);

    // Both runs pushed a forced-logout notification
    assert_eq!(notifier.revoked_users(), vec![user.id, user.id]);

    common::cleanup_test_user(&pool, user.id).await;
}

#[tokio::test]
#[serial]
async fn test_force_logout_bumps_password_changed_at() {
    let Some(pool) = common::try_pool().await else {
        return;
    };
    let user = common::create_test_user(&pool).await;
    let (service, notifier) = common::test_session_service(&pool);

    assert_eq!(user.password_changed_at, 0);
    service.start_session(&user).await.unwrap();

    let before = Utc::now().timestamp_millis();
    service.force_logout(user.id).await.unwrap();

    let mut conn = pool.get().await.unwrap();
    let reloaded = chirp_backend_core::models::user::User::find_by_id(&mut conn, user.id)
        .await
        .unwrap();
    assert!(reloaded.password_changed_at >= before);
    assert_eq!(notifier.revoked_users(), vec![user.id]);

    common::cleanup_test_user(&pool, user.id).await;
}
