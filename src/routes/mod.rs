mod auth;
mod health_check;
mod password_reset;

pub use auth::{get_current_user, list_sessions, login, logout, logout_all, refresh};
pub use health_check::health_check;
pub use password_reset::{request_password_reset, reset_password};
