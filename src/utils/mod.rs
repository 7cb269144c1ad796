// Utility modules for the chirp backend core

pub mod api_error;
pub mod password;
pub mod validation;

pub use api_error::{log_auth_failure, ApiError, ApiErrorBody};
pub use password::{hash_password, verify_password, PasswordError};
pub use validation::{
    username_from_email, validate_display_name, validate_email, validate_password,
    validate_username,
};
