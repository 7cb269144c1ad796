// Shared helpers for database-gated integration tests.
// Suites skip with a notice when DATABASE_URL is absent or unreachable so the
// unit suites stay runnable without infrastructure.

use bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use chirp_backend_core::db::DieselPool;
use chirp_backend_core::models::user::{NewUser, User};
use chirp_backend_core::services::{SessionNotifier, SessionService, TokenConfig, TokenService};

/// Build a pool against DATABASE_URL, running migrations first.
/// Returns None (with a notice) when no database is reachable.
pub async fn try_pool() -> Option<DieselPool> {
    dotenv::from_filename(".env.test").ok();
    dotenv::dotenv().ok();

    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: DATABASE_URL not set");
            return None;
        },
    };

    let migrate_url = url.clone();
    let migrated = tokio::task::spawn_blocking(move || {
        use diesel::{Connection, PgConnection};
        use diesel_migrations::MigrationHarness;

        let mut conn = PgConnection::establish(&migrate_url).ok()?;
        conn.run_pending_migrations(chirp_backend_core::db::diesel_pool::MIGRATIONS)
            .ok()?;
        Some(())
    })
    .await
    .ok()
    .flatten();

    if migrated.is_none() {
        eprintln!("Skipping test: database not reachable");
        return None;
    }

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
    Pool::builder().max_size(5).build(manager).await.ok()
}

/// Notifier that records every forced-logout push for assertions
#[derive(Default)]
pub struct RecordingNotifier {
    revoked: Mutex<Vec<Uuid>>,
}

impl RecordingNotifier {
    pub fn revoked_users(&self) -> Vec<Uuid> {
        self.revoked.lock().unwrap().clone()
    }
}

impl SessionNotifier for RecordingNotifier {
    fn auth_revoked(&self, user_id: Uuid, _message: &str) {
        self.revoked.lock().unwrap().push(user_id);
    }
}

/// Session service wired with the deterministic test token config
pub fn test_session_service(pool: &DieselPool) -> (Arc<SessionService>, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let service = Arc::new(SessionService::new(
        pool.clone(),
        Arc::new(TokenService::new(TokenConfig::for_test())),
        Arc::clone(&notifier) as Arc<dyn SessionNotifier>,
        14,
    ));
    (service, notifier)
}

/// Token service sharing the test HMAC key, for computing digests in tests
pub fn test_token_service() -> TokenService {
    TokenService::new(TokenConfig::for_test())
}

/// Insert a unique test user
pub async fn create_test_user(pool: &DieselPool) -> User {
    let mut conn = pool.get().await.expect("Failed to get connection");
    let tag = Uuid::new_v4().simple().to_string();

    User::create(
        &mut conn,
        NewUser {
            email: format!("test-{}@example.com", tag),
            username: format!("u{}", &tag[..12]),
            display_name: "Test User".to_string(),
            password_hash: "$argon2id$v=19$m=1024,t=1,p=1$placeholder$placeholder".to_string(),
        },
    )
    .await
    .expect("Failed to create test user")
}

/// Delete a test user; refresh records cascade
pub async fn cleanup_test_user(pool: &DieselPool, user_id: Uuid) {
    use chirp_backend_core::schema::users;
    use diesel::prelude::*;
    use diesel_async::RunQueryDsl;

    let mut conn = pool.get().await.expect("Failed to get connection");
    diesel::delete(users::table.filter(users::id.eq(user_id)))
        .execute(&mut conn)
        .await
        .ok();
}
