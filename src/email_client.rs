use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AppError, EmailError};
use crate::password_reset::ResetNotifier;
use crate::users::User;

/// Client for the HTTP email API used to deliver password-reset links.
#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: String,
}

#[derive(Serialize)]
pub struct SendEmailRequest {
    from: String,
    to: String,
    #[serde(rename = "Html")]
    html: String,
    #[serde(rename = "Subject")]
    subject: String,
}

impl EmailClient {
    pub fn new(base_url: String, sender: String, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url,
            sender,
        }
    }

    pub async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_content: &str,
    ) -> Result<(), EmailError> {
        let url = format!("{}/email", self.base_url.trim_end_matches('/'));
        let request = SendEmailRequest {
            from: self.sender.clone(),
            to: recipient.to_string(),
            subject: subject.to_string(),
            html: html_content.to_string(),
        };

        self.http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmailError::ServiceUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ResetNotifier for EmailClient {
    async fn send_reset(&self, user: &User, token: &str) -> Result<(), AppError> {
        let html = format!(
            "<p>Hello {},</p>\
             <p>Use this code to reset your password: <strong>{}</strong></p>\
             <p>If you did not ask for a reset, ignore this email.</p>",
            user.username, token
        );
        self.send_email(&user.email, "Password reset", &html).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_provider_field_names() {
        let request = SendEmailRequest {
            from: "noreply@devos.dev".to_string(),
            to: "john@example.com".to_string(),
            html: "<p>hi</p>".to_string(),
            subject: "Password reset".to_string(),
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["to"], "john@example.com");
        assert_eq!(value["Subject"], "Password reset");
        assert_eq!(value["Html"], "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        let client = EmailClient::new(
            "http://127.0.0.1:9".to_string(),
            "noreply@devos.dev".to_string(),
            reqwest::Client::new(),
        );
        assert!(client.send_email("john@example.com", "s", "b").await.is_err());
    }
}
