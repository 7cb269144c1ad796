// Service modules for the chirp backend core

pub mod rate_limit;
pub mod session;
pub mod token;

pub use rate_limit::{RateLimitConfig, RateLimitService, RateLimitStatus};
pub use session::{
    classify_reuse, NoopNotifier, ReuseClass, SessionError, SessionNotifier, SessionService,
    SessionTokens, GRACE_WINDOW_MS,
};
pub use token::{TokenConfig, TokenError, TokenService, ACCESS_LEEWAY_SECS};
