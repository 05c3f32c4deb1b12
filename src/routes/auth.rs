/// Authentication Routes
///
/// Handles login, token refresh, logout, logout from every session and
/// information about the authenticated user.

use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::Claims;
use crate::error::{AppError, ErrorContext};
use crate::registry::TokenRecord;
use crate::session::{ClientInfo, SessionService};
use crate::users::UserResponse;

/// OAuth2 password-style login form
#[derive(Deserialize)]
pub struct LoginForm {
    /// Username or email
    pub username: String,
    pub password: String,
}

/// Body of refresh and logout requests
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn client_info(req: &HttpRequest) -> ClientInfo {
    ClientInfo {
        user_agent: req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
        ip_address: req.connection_info().realip_remote_addr().map(str::to_string),
    }
}

/// POST /auth/login
///
/// Authenticate with username (or email) and password.
/// Returns an access/refresh token pair on success.
///
/// # Errors
/// - 401: Incorrect username or password (also for inactive accounts)
/// - 500: Internal server error
pub async fn login(
    req: HttpRequest,
    form: web::Form<LoginForm>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let pair = sessions
        .login(&form.username, &form.password, &client_info(&req))
        .await?;
    tracing::info!(request_id = %context.request_id, "Login succeeded");

    Ok(HttpResponse::Ok().json(pair))
}

/// POST /auth/refresh
///
/// Exchange a refresh token for a new pair. The presented token is revoked
/// and can never be used again.
///
/// # Errors
/// - 401: Invalid payload, revoked/rotated token, or inactive user
pub async fn refresh(
    req: HttpRequest,
    body: web::Json<RefreshRequest>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let pair = sessions
        .refresh(&body.refresh_token, &client_info(&req))
        .await?;
    tracing::info!(request_id = %context.request_id, "Refresh succeeded");

    Ok(HttpResponse::Ok().json(pair))
}

/// POST /auth/logout
///
/// Revoke the session a refresh token belongs to. Succeeds for tokens that
/// were already revoked.
pub async fn logout(
    body: web::Json<RefreshRequest>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    sessions.logout(&body.refresh_token).await?;

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Successfully logged out.".to_string(),
    }))
}

/// POST /auth/logout_all
///
/// **Requires valid JWT access token.** Revokes every token of the caller,
/// including the one used for this request.
pub async fn logout_all(
    claims: web::ReqData<Claims>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("logout_all").with_user_id(claims.user_id);

    let count = sessions.logout_all(claims.user_id).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: format!("Logged out from {} sessions.", count),
    }))
}

/// GET /auth/me
///
/// **Requires valid JWT access token.**
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let user = sessions.current_user(claims.user_id).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/// GET /auth/sessions
///
/// **Requires valid JWT access token.** Lists the caller's live tokens
/// without the token strings.
pub async fn list_sessions(
    claims: web::ReqData<Claims>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let records: Vec<TokenRecord> = sessions.active_sessions(claims.user_id).await?;
    Ok(HttpResponse::Ok().json(records))
}
