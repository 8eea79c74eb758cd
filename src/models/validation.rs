use std::sync::LazyLock;

use regex::Regex;

use crate::error::ChannelError;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Returns the trimmed address, or the reason it cannot be used.
pub fn validate_email<'a>(user_id: &str, email: Option<&'a str>) -> Result<&'a str, ChannelError> {
    let email = match email.map(str::trim) {
        Some(email) if !email.is_empty() => email,
        _ => return Err(ChannelError::MissingEmail(user_id.to_string())),
    };

    if !is_valid_email(email) {
        return Err(ChannelError::InvalidEmail(email.to_string()));
    }

    Ok(email)
}
