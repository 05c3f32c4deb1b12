use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use devos_auth::auth::TokenCodec;
use devos_auth::bootstrap::ensure_admin;
use devos_auth::cleanup::CleanupTask;
use devos_auth::configuration::get_configuration;
use devos_auth::email_client::EmailClient;
use devos_auth::password_reset::{LogNotifier, PasswordResetService, ResetNotifier};
use devos_auth::registry::{PgTokenRegistry, TokenRegistry};
use devos_auth::session::SessionService;
use devos_auth::startup::run;
use devos_auth::telemetry::init_telemetry;
use devos_auth::users::{PgUserStore, UserStore};

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = get_configuration().map_err(|e| {
        tracing::error!("Failed to read configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    let codec = TokenCodec::new(&configuration.jwt).map_err(|e| {
        tracing::error!("Invalid JWT configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "JWT configuration error")
    })?;

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            startup_error(std::io::ErrorKind::ConnectionRefused, "Database connection error")
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        startup_error(std::io::ErrorKind::Other, "Migration error")
    })?;
    tracing::info!("Database ready");

    let registry: Arc<dyn TokenRegistry> = Arc::new(PgTokenRegistry::new(pool.clone()));
    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool));

    if let Some(admin) = &configuration.bootstrap_admin {
        ensure_admin(users.as_ref(), admin).await.map_err(|e| {
            tracing::error!("Failed to create bootstrap admin: {}", e);
            startup_error(std::io::ErrorKind::Other, "Bootstrap error")
        })?;
    }

    let notifier: Arc<dyn ResetNotifier> = match &configuration.email {
        Some(email) => Arc::new(EmailClient::new(
            email.base_url.clone(),
            email.sender.clone(),
            reqwest::Client::new(),
        )),
        None => {
            tracing::warn!("No email settings; password reset tokens will not be delivered");
            Arc::new(LogNotifier)
        }
    };

    let password_reset = PasswordResetService::new(
        users.clone(),
        notifier,
        chrono::Duration::seconds(configuration.password_reset.token_expiry),
    )
    .map_err(|e| {
        tracing::error!("Invalid password reset configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Password reset configuration error")
    })?;

    let cleanup = CleanupTask::new(
        registry.clone(),
        Duration::from_secs(configuration.cleanup.interval_seconds),
    )
    .map_err(|e| {
        tracing::error!("Invalid cleanup configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Cleanup configuration error")
    })?
    .spawn();
    tokio::spawn(async move {
        if let Err(e) = cleanup.await {
            tracing::error!(error = %e, "Expired token cleanup task stopped");
        }
    });

    let sessions = SessionService::new(codec, registry, users);

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, sessions, password_reset)?.await
}
