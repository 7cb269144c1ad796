// HTTP route builders for the chirp backend core

pub mod auth;
pub mod posts;

use crate::app::AppState;
use crate::middleware::{require_auth, require_fresh_auth};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};

/// Authentication routes under /v1/auth
pub fn auth_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/me", get(auth::me))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    // Sensitive routes re-check user existence and password_changed_at
    let sensitive = Router::new()
        .route("/change-password", post(auth::change_password))
        .route("/force-logout", post(auth::force_logout))
        .route("/delete-account", post(auth::delete_account))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            require_fresh_auth,
        ));

    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh_token))
        .route("/logout", post(auth::logout))
        .merge(protected)
        .merge(sensitive)
}

/// Post routes under /v1/posts
pub fn post_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/", post(posts::create_post))
        .route("/{id}/like", post(posts::like_post))
        .route_layer(axum_middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .route("/timeline", get(posts::timeline))
        .merge(protected)
}
