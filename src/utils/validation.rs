// Input validation for the registration surface.
// Validation failures are values mapped to 400 codes by the handlers.

use crate::utils::api_error::ApiError;

/// Trim and validate an email address
pub fn validate_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || email.len() > 320 || !validator::validate_email(email.as_str()) {
        return Err(ApiError::InvalidEmail);
    }
    Ok(email)
}

/// Minimum length only; complexity rules live client-side
pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 || password.len() > 128 {
        return Err(ApiError::WeakPassword);
    }
    Ok(())
}

/// Trim and validate a display name
pub fn validate_display_name(raw: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > 50 {
        return Err(ApiError::InvalidDisplayName);
    }
    Ok(name.to_string())
}

/// Trim and validate a username: 3-30 chars of [a-z0-9_]
pub fn validate_username(raw: &str) -> Result<String, ApiError> {
    let username = raw.trim().to_lowercase();
    if username.len() < 3
        || username.len() > 30
        || !username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ApiError::InvalidUsername);
    }
    Ok(username)
}

/// Derive a username candidate from an email local part
pub fn username_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or("user");
    let mut candidate: String = local
        .chars()
        .filter_map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                Some(c)
            } else if c == '.' || c == '-' {
                Some('_')
            } else {
                None
            }
        })
        .take(30)
        .collect();

    while candidate.len() < 3 {
        candidate.push('0');
    }
    candidate
}
