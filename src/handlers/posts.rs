// Post handlers: the public timeline read and the thin write surface that
// feeds the realtime fabric. Replies, bookmarks, media and search live in
// their own services.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    app::AppState,
    middleware::auth::CurrentUser,
    middleware::auth_middleware::OptionalUser,
    models::post::{NewPost, Post, PostError},
    realtime::frames::{post_topic, NewPostData, PostLikedData, ServerFrame},
    realtime::router::Target,
    utils::ApiError,
};

const TIMELINE_PAGE_SIZE: i64 = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub like_count: i32,
    pub created_at: DateTime<Utc>,
}

impl From<Post> for PostView {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            author_id: post.author_id,
            content: post.content,
            like_count: post.like_count,
            created_at: post.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineResponse {
    pub posts: Vec<PostView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub post_id: Uuid,
    pub like_count: i32,
}

/// GET /v1/posts/timeline - public read with soft auth.
/// A stale or forged credential resolves to an anonymous viewer; the read
/// still succeeds.
pub async fn timeline(
    State(state): State<AppState>,
    OptionalUser(viewer): OptionalUser,
) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.diesel_pool.get().await.map_err(|e| {
        tracing::error!("Failed to get database connection: {}", e);
        ApiError::Internal
    })?;

    let posts = Post::timeline(&mut conn, TIMELINE_PAGE_SIZE)
        .await
        .map_err(|e| {
            tracing::error!("Timeline query failed: {}", e);
            ApiError::Internal
        })?;

    tracing::debug!(
        viewer = viewer.as_ref().map(|u| u.username.as_str()).unwrap_or("anonymous"),
        count = posts.len(),
        "Timeline served"
    );

    Ok(Json(TimelineResponse {
        posts: posts.into_iter().map(PostView::from).collect(),
    }))
}

/// POST /v1/posts - create a post and broadcast it to every connection
pub async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = request.content.trim().to_string();
    if content.is_empty() || content.chars().count() > 500 {
        return Err(ApiError::InvalidContent);
    }

    let mut conn = state.diesel_pool.get().await.map_err(|e| {
        tracing::error!("Failed to get database connection: {}", e);
        ApiError::Internal
    })?;

    let post = Post::create(
        &mut conn,
        NewPost {
            author_id: user.user_id,
            content,
        },
    )
    .await
    .map_err(|e| {
        tracing::error!("Post creation failed: {}", e);
        ApiError::Internal
    })?;
    drop(conn);

    // Fire-and-forget: the post exists whether or not delivery succeeds
    state.event_router.publish(
        Target::Broadcast,
        ServerFrame::NewPost {
            data: NewPostData {
                post_id: post.id,
                author_id: post.author_id,
                author_display_name: user.display_name.clone(),
                author_username: user.username.clone(),
                content: post.content.clone(),
                created_at: post.created_at,
            },
        },
    );

    Ok((StatusCode::CREATED, Json(PostView::from(post))))
}

/// POST /v1/posts/{id}/like - like a post and notify its topic subscribers
pub async fn like_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.diesel_pool.get().await.map_err(|e| {
        tracing::error!("Failed to get database connection: {}", e);
        ApiError::Internal
    })?;

    let like_count = Post::increment_like_count(&mut conn, post_id)
        .await
        .map_err(|e| match e {
            PostError::NotFound => ApiError::PostNotFound,
            other => {
                tracing::error!("Like update failed: {}", other);
                ApiError::Internal
            },
        })?;
    drop(conn);

    state.event_router.publish(
        Target::Topic(post_topic(post_id)),
        ServerFrame::PostLiked {
            data: PostLikedData {
                post_id,
                liked_by_user_id: user.user_id,
                liked_by_display_name: user.display_name.clone(),
                liked_by_username: user.username.clone(),
                new_like_count: like_count,
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        },
    );

    Ok(Json(LikeResponse {
        post_id,
        like_count,
    }))
}
