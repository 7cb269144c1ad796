// Minimal posts store.
// Backs the public timeline and the per-post like topic; the full posting
// domain (replies, bookmarks, media) lives outside this core.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::posts;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = posts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub like_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = posts)]
pub struct NewPost {
    pub author_id: Uuid,
    pub content: String,
}

#[derive(thiserror::Error, Debug)]
pub enum PostError {
    #[error("Database error: {0}")]
    Database(diesel::result::Error),

    #[error("Post not found")]
    NotFound,

    #[error("Connection pool error")]
    Pool(String),
}

impl From<diesel::result::Error> for PostError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => PostError::NotFound,
            _ => PostError::Database(e),
        }
    }
}

impl Post {
    pub async fn create(conn: &mut AsyncPgConnection, new_post: NewPost) -> Result<Self, PostError> {
        use crate::schema::posts::dsl::*;

        diesel::insert_into(posts)
            .values(&new_post)
            .get_result::<Post>(conn)
            .await
            .map_err(PostError::from)
    }

    pub async fn find_by_id(conn: &mut AsyncPgConnection, post_id: Uuid) -> Result<Self, PostError> {
        use crate::schema::posts::dsl::*;

        posts
            .filter(id.eq(post_id))
            .first::<Post>(conn)
            .await
            .map_err(PostError::from)
    }

    /// Newest-first timeline page
    pub async fn timeline(
        conn: &mut AsyncPgConnection,
        limit: i64,
    ) -> Result<Vec<Self>, PostError> {
        use crate::schema::posts::dsl::*;

        posts
            .order(created_at.desc())
            .limit(limit)
            .load::<Post>(conn)
            .await
            .map_err(PostError::from)
    }

    /// Bump the like counter and return the new count
    pub async fn increment_like_count(
        conn: &mut AsyncPgConnection,
        post_id: Uuid,
    ) -> Result<i32, PostError> {
        use crate::schema::posts::dsl::*;

        let updated: Post = diesel::update(posts.filter(id.eq(post_id)))
            .set(like_count.eq(like_count + 1))
            .get_result(conn)
            .await
            .map_err(PostError::from)?;

        Ok(updated.like_count)
    }
}
