pub mod auth;
pub mod bootstrap;
pub mod cleanup;
pub mod configuration;
pub mod email_client;
pub mod error;
pub mod logger;
pub mod middleware;
pub mod password_reset;
pub mod registry;
pub mod routes;
pub mod session;
pub mod startup;
pub mod telemetry;
pub mod users;
pub mod validators;
