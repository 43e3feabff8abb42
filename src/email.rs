//! Outbound email delivery.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use url::Url;

#[derive(Clone, Debug, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Logs the message instead of delivering it. Default when no relay is
/// configured; the confirmation link still shows up in the logs.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.html_body,
            "email delivery stub"
        );
        Ok(())
    }
}

/// Posts messages as JSON to an HTTP relay endpoint.
#[derive(Clone, Debug)]
pub struct HttpEmailSender {
    client: reqwest::Client,
    relay_url: Url,
}

impl HttpEmailSender {
    /// # Errors
    /// Return error if the HTTP client cannot be built
    pub fn new(relay_url: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::ensaluti::APP_USER_AGENT)
            .build()
            .context("failed to build email relay client")?;
        Ok(Self { client, relay_url })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let response = self
            .client
            .post(self.relay_url.clone())
            .json(message)
            .send()
            .await
            .context("email relay request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("email relay returned {status}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn log_sender_always_succeeds() -> Result<()> {
        let sender = LogEmailSender;
        let message = EmailMessage {
            to: "alice@example.com".to_string(),
            subject: "Confirm your account".to_string(),
            html_body: "<a href=\"https://example.com\">link</a>".to_string(),
        };
        sender.send(&message).await?;
        Ok(())
    }

    #[test]
    fn http_sender_builds_client() -> Result<()> {
        let relay = Url::parse("http://localhost:8025/send")?;
        let sender = HttpEmailSender::new(relay)?;
        assert_eq!(sender.relay_url.as_str(), "http://localhost:8025/send");
        Ok(())
    }

    #[test]
    fn message_serializes_all_fields() -> Result<()> {
        let message = EmailMessage {
            to: "alice@example.com".to_string(),
            subject: "Confirm your account".to_string(),
            html_body: "body".to_string(),
        };
        let json = serde_json::to_value(&message)?;
        assert_eq!(json["to"], "alice@example.com");
        assert_eq!(json["subject"], "Confirm your account");
        assert_eq!(json["html_body"], "body");
        Ok(())
    }
}
