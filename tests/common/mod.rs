//! Shared harness: the full HTTP app on a random port, backed by the
//! in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use devos_auth::auth::{hash_with_cost, TokenCodec};
use devos_auth::configuration::JwtSettings;
use devos_auth::error::AppError;
use devos_auth::password_reset::{PasswordResetService, ResetNotifier};
use devos_auth::registry::InMemoryTokenRegistry;
use devos_auth::session::SessionService;
use devos_auth::startup::run;
use devos_auth::users::{InMemoryUserStore, NewUser, User, UserStore};

pub const USERNAME: &str = "john_doe";
pub const EMAIL: &str = "john@example.com";
pub const PASSWORD: &str = "StrongPassw0rd";

/// Keeps reset tokens instead of sending them.
#[derive(Default)]
pub struct CapturingNotifier {
    pub sent: Mutex<Vec<(i64, String)>>,
}

impl CapturingNotifier {
    pub fn last_token(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, token)| token.clone())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ResetNotifier for CapturingNotifier {
    async fn send_reset(&self, user: &User, token: &str) -> Result<(), AppError> {
        self.sent.lock().unwrap().push((user.id, token.to_string()));
        Ok(())
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub users: Arc<InMemoryUserStore>,
    pub registry: Arc<InMemoryTokenRegistry>,
    pub notifier: Arc<CapturingNotifier>,
    pub user_id: i64,
}

pub fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: "integration-test-secret-0123456789abcdef".to_string(),
        algorithm: "HS256".to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 604800,
        issuer: "devos-test".to_string(),
    }
}

pub async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let registry = Arc::new(InMemoryTokenRegistry::new());
    let users = Arc::new(InMemoryUserStore::new(registry.clone()));
    let notifier = Arc::new(CapturingNotifier::default());

    let user = users
        .create(NewUser {
            username: USERNAME.to_string(),
            email: EMAIL.to_string(),
            password_hash: hash_with_cost(PASSWORD, 4).unwrap(),
            is_active: true,
            is_superuser: false,
            roles: vec!["developer".to_string()],
        })
        .await
        .expect("Failed to create test user");

    let codec = TokenCodec::new(&jwt_settings()).expect("Invalid JWT settings");
    let sessions = SessionService::new(codec, registry.clone(), users.clone());
    let password_reset =
        PasswordResetService::new(users.clone(), notifier.clone(), chrono::Duration::hours(1))
            .expect("Invalid password reset settings")
            .with_hash_cost(4);

    let server = run(listener, sessions, password_reset).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        client: reqwest::Client::new(),
        users,
        registry,
        notifier,
        user_id: user.id,
    }
}

impl TestApp {
    pub async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(&format!("{}/auth/login", &self.address))
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Log the test user in and return the response body.
    pub async fn login_ok(&self) -> serde_json::Value {
        let response = self.login(USERNAME, PASSWORD).await;
        assert_eq!(200, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", &self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn refresh(&self, refresh_token: &str) -> reqwest::Response {
        self.post_json("/auth/refresh", &serde_json::json!({ "refresh_token": refresh_token }))
            .await
    }

    pub async fn get_authorized(&self, path: &str, access_token: &str) -> reqwest::Response {
        self.client
            .get(&format!("{}{}", &self.address, path))
            .bearer_auth(access_token)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn logout_all(&self, access_token: &str) -> reqwest::Response {
        self.client
            .post(&format!("{}/auth/logout_all", &self.address))
            .bearer_auth(access_token)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}
