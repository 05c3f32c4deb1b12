use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::AppError;
use crate::password_reset::PasswordResetService;
use crate::routes::auth::MessageResponse;

#[derive(Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetConfirm {
    pub token: String,
    pub new_password: String,
}

/// POST /auth/password-reset/request
///
/// Same answer whether or not the email belongs to an account.
pub async fn request_password_reset(
    body: web::Json<ResetRequest>,
    resets: web::Data<PasswordResetService>,
) -> Result<HttpResponse, AppError> {
    let message = resets.request_reset(&body.email).await?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: message.to_string(),
    }))
}

/// POST /auth/password-reset/reset
///
/// # Errors
/// - 400: Invalid or expired token, inactive user, or weak password
pub async fn reset_password(
    body: web::Json<ResetConfirm>,
    resets: web::Data<PasswordResetService>,
) -> Result<HttpResponse, AppError> {
    resets.consume_reset(&body.token, &body.new_password).await?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Password has been reset successfully.".to_string(),
    }))
}
