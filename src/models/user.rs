// User database model.
// The session core reads id, display_name, username and password_changed_at;
// everything else belongs to the account surface.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::users;

/// User database model - queryable from database
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    /// Epoch millis of the last password change; 0 means never changed.
    /// Credentials issued before this instant fail sensitive-route checks.
    pub password_changed_at: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New user for insertion
#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
}

/// Errors for user operations
#[derive(thiserror::Error, Debug)]
pub enum UserError {
    #[error("Database error: {0}")]
    Database(diesel::result::Error),

    #[error("User not found")]
    NotFound,

    #[error("Email or username already registered")]
    AlreadyExists,

    #[error("Connection pool error")]
    Pool(String),
}

impl From<diesel::result::Error> for UserError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => UserError::NotFound,
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => UserError::AlreadyExists,
            _ => UserError::Database(e),
        }
    }
}

impl User {
    /// Find user by ID
    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;

        users
            .filter(id.eq(user_id))
            .first::<User>(conn)
            .await
            .map_err(UserError::from)
    }

    /// Find user by email (case-insensitive)
    pub async fn find_by_email(
        conn: &mut AsyncPgConnection,
        email_str: &str,
    ) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;
        use diesel::PgTextExpressionMethods;

        users
            .filter(email.ilike(email_str))
            .first::<User>(conn)
            .await
            .map_err(UserError::from)
    }

    /// Find user by username (case-insensitive)
    pub async fn find_by_username(
        conn: &mut AsyncPgConnection,
        username_str: &str,
    ) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;
        use diesel::PgTextExpressionMethods;

        users
            .filter(username.ilike(username_str))
            .first::<User>(conn)
            .await
            .map_err(UserError::from)
    }

    /// Create a new user
    pub async fn create(conn: &mut AsyncPgConnection, new_user: NewUser) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;

        diesel::insert_into(users)
            .values(&new_user)
            .get_result::<User>(conn)
            .await
            .map_err(UserError::from)
    }

    /// Replace the password hash and bump password_changed_at to now.
    /// Invalidates every access credential issued before this instant on
    /// sensitive routes.
    pub async fn update_password(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        new_hash: &str,
        changed_at_ms: i64,
    ) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set((
                password_hash.eq(new_hash),
                password_changed_at.eq(changed_at_ms),
                updated_at.eq(Utc::now()),
            ))
            .get_result::<User>(conn)
            .await
            .map_err(UserError::from)
    }

    /// Bump password_changed_at without touching the hash (admin force logout)
    pub async fn bump_password_changed_at(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        changed_at_ms: i64,
    ) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set((
                password_changed_at.eq(changed_at_ms),
                updated_at.eq(Utc::now()),
            ))
            .get_result::<User>(conn)
            .await
            .map_err(UserError::from)
    }

    /// Deactivate a user account
    pub async fn deactivate(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set((is_active.eq(false), updated_at.eq(Utc::now())))
            .get_result::<User>(conn)
            .await
            .map_err(UserError::from)
    }
}
