/// Password hashing with bcrypt plus the strength rules applied to new
/// passwords (password reset, bootstrap admin).

use bcrypt::{hash, verify, DEFAULT_COST};
use lazy_static::lazy_static;

use crate::error::{AppError, ValidationError};

const MIN_PASSWORD_LENGTH: usize = 8;
// bcrypt ignores everything past 72 bytes
const MAX_PASSWORD_LENGTH: usize = 72;

/// Validate strength and hash a new password.
///
/// # Errors
/// Validation error for weak passwords, internal error if bcrypt fails.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    validate_password_strength(password)?;
    hash_with_cost(password, DEFAULT_COST)
}

pub fn hash_with_cost(password: &str, cost: u32) -> Result<String, AppError> {
    hash(password, cost).map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a stored bcrypt hash.
///
/// A malformed stored hash counts as a mismatch so that login keeps reporting
/// the same generic failure.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match verify(password, password_hash) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::error!(error = %e, "Stored password hash could not be verified");
            false
        }
    }
}

lazy_static! {
    // Hashed once, on first use, at the cost new passwords get.
    static ref DUMMY_PASSWORD_HASH: String =
        hash("dummy-password-for-unknown-accounts", DEFAULT_COST).unwrap_or_default();
}

/// Spend the same bcrypt work as `verify_password` when there is no stored
/// hash to check, so unknown accounts answer as slowly as known ones.
pub fn verify_against_dummy(password: &str) {
    let _ = verify(password, DUMMY_PASSWORD_HASH.as_str());
}

/// Requirements: 8 to 72 bytes, at least one digit, one lowercase and one
/// uppercase letter.
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password".to_string()));
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort("password".to_string(), MIN_PASSWORD_LENGTH));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong("password".to_string(), MAX_PASSWORD_LENGTH));
    }

    let has_digit = password.chars().any(|c| c.is_numeric());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_uppercase());

    if !has_digit || !has_lowercase || !has_uppercase {
        return Err(ValidationError::InvalidFormat(
            "password must contain at least one digit, one lowercase letter, and one uppercase letter"
                .to_string(),
        ));
    }

    Ok(())
}
