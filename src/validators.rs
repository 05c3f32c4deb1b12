/// Input validators for account identifiers
/// - Length limits so oversized input never reaches the database
/// - Email format check (simplified RFC 5322)
/// - Username character set

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 150;
const MIN_USERNAME_LENGTH: usize = 3;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    )
    .unwrap();

    static ref USERNAME_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9_.@+-]+$").unwrap();
}

/// Validates and normalizes an email address (trimmed, lowercased).
pub fn is_valid_email(email: &str) -> Result<String, ValidationError> {
    let normalized = email.trim().to_lowercase();

    if normalized.is_empty() {
        return Err(ValidationError::EmptyField("email".to_string()));
    }
    if normalized.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort("email".to_string(), MIN_EMAIL_LENGTH));
    }
    if normalized.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email".to_string(), MAX_EMAIL_LENGTH));
    }
    if normalized.contains('\0') || !EMAIL_REGEX.is_match(&normalized) {
        return Err(ValidationError::InvalidFormat(
            "email has invalid format".to_string(),
        ));
    }

    Ok(normalized)
}

/// Validates a username: 3-150 chars of letters, digits and `_.@+-`.
pub fn is_valid_username(username: &str) -> Result<String, ValidationError> {
    let trimmed = username.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("username".to_string()));
    }
    if trimmed.len() < MIN_USERNAME_LENGTH {
        return Err(ValidationError::TooShort("username".to_string(), MIN_USERNAME_LENGTH));
    }
    if trimmed.len() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::TooLong("username".to_string(), MAX_USERNAME_LENGTH));
    }
    if !USERNAME_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat(
            "username may only contain letters, digits and _.@+-".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_email() {
        assert_eq!(is_valid_email(" John@Example.com ").unwrap(), "john@example.com");
        assert!(is_valid_email("user+tag@example.co.uk").is_ok());
    }

    #[test]
    fn test_invalid_email() {
        assert!(matches!(is_valid_email("  "), Err(ValidationError::EmptyField(_))));
        assert!(is_valid_email("invalid").is_err());
        assert!(is_valid_email("user@").is_err());
        assert!(is_valid_email("a@b@example.com").is_err());

        let long = format!("{}@example.com", "a".repeat(250));
        assert!(matches!(is_valid_email(&long), Err(ValidationError::TooLong(_, _))));
    }

    #[test]
    fn test_username() {
        assert_eq!(is_valid_username(" john_doe ").unwrap(), "john_doe");
        assert!(matches!(is_valid_username("jo"), Err(ValidationError::TooShort(_, _))));
        assert!(is_valid_username("john doe").is_err());
        assert!(is_valid_username("drop;table").is_err());
    }
}
