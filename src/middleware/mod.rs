// Middleware modules for the chirp backend core

pub mod auth;
pub mod auth_middleware;

pub use auth::CurrentUser;
pub use auth_middleware::{bearer_token, require_auth, require_fresh_auth, OptionalUser};
