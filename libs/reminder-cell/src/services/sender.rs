use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client};
use serde_json::json;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::error::ReminderError;

/// Outbound mail transport. Any error is treated as retryable by the
/// dispatcher.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), ReminderError>;
}

/// Posts reminders to a JSON mail API (`{from, to, subject, html}` with a
/// bearer key).
pub struct HttpEmailSender {
    client: Client,
    api_url: String,
    api_key: String,
    from_address: String,
}

impl HttpEmailSender {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config.mail_api_url.clone(),
            api_key: config.mail_api_key.clone(),
            from_address: config.mail_from_address.clone(),
        }
    }
}

#[async_trait]
impl NotificationSender for HttpEmailSender {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), ReminderError> {
        debug!("Sending email to {} via {}", to, self.api_url);

        let response = self
            .client
            .post(&self.api_url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&json!({
                "from": self.from_address,
                "to": [to],
                "subject": subject,
                "html": html_body,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Mail API error ({}): {}", status, body);
            return Err(ReminderError::Transport(format!(
                "mail API returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        Ok(())
    }
}

/// Used when no mail API is configured; reminders are logged and count as sent.
pub struct LogOnlySender;

#[async_trait]
impl NotificationSender for LogOnlySender {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), ReminderError> {
        info!("Mail transport not configured, would send '{}' to {}", subject, to);
        Ok(())
    }
}

pub fn sender_from_config(config: &AppConfig) -> Arc<dyn NotificationSender> {
    if config.is_mail_configured() {
        Arc::new(HttpEmailSender::new(config))
    } else {
        Arc::new(LogOnlySender)
    }
}
