/// Minimum room password length.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Maximum room password length.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Maximum username length, in characters.
pub const MAX_USERNAME_LENGTH: usize = 32;

/// Validate a display name. Must be 1-32 characters with no control characters.
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.trim().is_empty() {
        return Err("Display name is required".into());
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(format!(
            "Display name too long (max {} characters)",
            MAX_USERNAME_LENGTH
        ));
    }
    if username.chars().any(char::is_control) {
        return Err("Display name cannot contain control characters".into());
    }
    Ok(())
}

/// Validate a room password.
pub fn validate_room_password(password: &str) -> Result<(), String> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    if len > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password too long (max {} characters)",
            MAX_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

/// Validate message content. Must be non-blank and at most `max_len` bytes.
pub fn validate_message(content: &str, max_len: usize) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Message cannot be empty".into());
    }
    if content.len() > max_len {
        return Err(format!("Message too long (max {} bytes)", max_len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_usernames() {
        assert!(validate_username("Astrid").is_ok());
        assert!(validate_username("Björn the Bold").is_ok());
        assert!(validate_username(&"å".repeat(32)).is_ok());
    }

    #[test]
    fn test_invalid_usernames() {
        assert!(validate_username("").is_err());
        assert!(validate_username("   ").is_err());
        assert!(validate_username("tab\there").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_password_validation() {
        assert!(validate_room_password("secret").is_ok());
        assert!(validate_room_password("short").is_err());
        assert!(validate_room_password("").is_err());
        assert!(validate_room_password(&"p".repeat(129)).is_err());
    }

    #[test]
    fn test_message_validation() {
        assert!(validate_message("Skål!", 10).is_ok());
        assert!(validate_message("", 10).is_err());
        assert!(validate_message(" \n ", 10).is_err());
        assert!(validate_message(&"a".repeat(11), 10).is_err());
        assert!(validate_message(&"a".repeat(10), 10).is_ok());
    }
}
