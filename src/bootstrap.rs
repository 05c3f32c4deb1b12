use crate::auth::hash_password;
use crate::configuration::BootstrapAdminSettings;
use crate::error::AppError;
use crate::users::{NewUser, User, UserStore};
use crate::validators::{is_valid_email, is_valid_username};

/// Create the configured superuser unless an account with that username
/// already exists. Returns the created user.
pub async fn ensure_admin(
    users: &dyn UserStore,
    settings: &BootstrapAdminSettings,
) -> Result<Option<User>, AppError> {
    let username = is_valid_username(&settings.username)?;
    if users.find_by_username(&username).await?.is_some() {
        tracing::debug!(username = %username, "Bootstrap admin already exists");
        return Ok(None);
    }

    let user = users
        .create(NewUser {
            username,
            email: is_valid_email(&settings.email)?,
            password_hash: hash_password(&settings.password)?,
            is_active: true,
            is_superuser: true,
            roles: vec!["admin".to_string()],
        })
        .await?;

    tracing::info!(user_id = user.id, username = %user.username, "Created bootstrap admin");
    Ok(Some(user))
}
