use config::builder::{ConfigBuilder, DefaultState};
use serde::Deserialize;

use crate::error::ConfigError;

/// Application settings.
///
/// Read from an optional `configuration` file (yaml/toml/json) in the working
/// directory, then overridden by `APP__SECTION__KEY` environment variables,
/// e.g. `APP__JWT__SECRET`.
#[derive(Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub password_reset: PasswordResetSettings,
    #[serde(default)]
    pub cleanup: CleanupSettings,
    pub email: Option<EmailSettings>,
    pub bootstrap_admin: Option<BootstrapAdminSettings>,
}

#[derive(Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// JWT authentication settings
#[derive(Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    pub access_token_expiry: i64,   // seconds (e.g., 900 for 15 minutes)
    pub refresh_token_expiry: i64,  // seconds (e.g., 604800 for 7 days)
    pub issuer: String,
}

#[derive(Deserialize, Clone)]
pub struct PasswordResetSettings {
    /// seconds
    pub token_expiry: i64,
}

impl Default for PasswordResetSettings {
    fn default() -> Self {
        Self { token_expiry: 3600 }
    }
}

#[derive(Deserialize, Clone)]
pub struct CleanupSettings {
    pub interval_seconds: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self { interval_seconds: 300 }
    }
}

/// HTTP email API used to deliver reset tokens. Without it, deliveries are
/// only logged.
#[derive(Deserialize, Clone)]
pub struct EmailSettings {
    pub base_url: String,
    pub sender: String,
}

#[derive(Deserialize, Clone)]
pub struct BootstrapAdminSettings {
    pub username: String,
    pub email: String,
    pub password: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        );
    load(builder)
}

fn load(builder: ConfigBuilder<DefaultState>) -> Result<Settings, ConfigError> {
    builder
        .build()
        .and_then(|settings| settings.try_deserialize::<Settings>())
        .map_err(|e| ConfigError::Load(e.to_string()))
}
