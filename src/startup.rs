use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;

use crate::logger::RequestLogger;
use crate::middleware::JwtMiddleware;
use crate::password_reset::PasswordResetService;
use crate::routes::{
    get_current_user, health_check, list_sessions, login, logout, logout_all, refresh,
    request_password_reset, reset_password,
};
use crate::session::SessionService;

pub fn run(
    listener: TcpListener,
    sessions: SessionService,
    password_reset: PasswordResetService,
) -> Result<Server, std::io::Error> {
    let sessions_data = web::Data::new(sessions.clone());
    let password_reset = web::Data::new(password_reset);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)

            // Shared state
            .app_data(sessions_data.clone())
            .app_data(password_reset.clone())

            // Public routes (no authentication required)
            .route("/health_check", web::get().to(health_check))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))
            .route("/auth/password-reset/request", web::post().to(request_password_reset))
            .route("/auth/password-reset/reset", web::post().to(reset_password))

            // Protected routes (require a live access token)
            .service(
                web::scope("/auth")
                    .wrap(JwtMiddleware::new(sessions.clone()))
                    .route("/logout_all", web::post().to(logout_all))
                    .route("/me", web::get().to(get_current_user))
                    .route("/sessions", web::get().to(list_sessions)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
