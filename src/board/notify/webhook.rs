use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::NotificationChannel;
use crate::board::models::NotificationMessage;

/// Generic JSON webhook.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    board_id: i64,
    board_name: &'a str,
    idea_id: i64,
    idea_title: &'a str,
    feedback_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    emoji: Option<&'a str>,
    client_ip: &'a str,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin_email: Option<&'a str>,
}

impl<'a> From<&'a NotificationMessage> for WebhookPayload<'a> {
    fn from(message: &'a NotificationMessage) -> Self {
        Self {
            board_id: message.board_id,
            board_name: &message.board_name,
            idea_id: message.idea_id,
            idea_title: &message.idea_title,
            feedback_type: message.feedback.feedback_type(),
            emoji: message.feedback.symbol(),
            client_ip: &message.origin,
            timestamp: message.at,
            admin_email: message.admin_email.as_deref(),
        }
    }
}

impl WebhookChannel {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&WebhookPayload::from(message))
            .send()
            .await
            .context("Failed to send webhook request")?
            .error_for_status()
            .context("Webhook endpoint returned error status")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::board::models::FeedbackKind;
    use crate::board::notify::test_support::{capture_server, message, unreachable_url};

    #[tokio::test]
    async fn test_posts_camel_case_payload() {
        let (url, mut rx) = capture_server(StatusCode::OK).await;
        let channel = WebhookChannel::new(reqwest::Client::new(), url);
        let mut msg = message(FeedbackKind::emoji("🔥").unwrap());
        msg.admin_email = Some("admin@example.com".to_string());

        channel.deliver(&msg).await.unwrap();
        let body = rx.recv().await.unwrap().body;
        assert_eq!(body["boardId"], 7);
        assert_eq!(body["boardName"], "Roadmap");
        assert_eq!(body["ideaId"], 42);
        assert_eq!(body["ideaTitle"], "Dark mode");
        assert_eq!(body["feedbackType"], "emoji");
        assert_eq!(body["emoji"], "🔥");
        assert_eq!(body["clientIp"], "203.0.113.9");
        assert_eq!(body["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(body["adminEmail"], "admin@example.com");
    }

    #[tokio::test]
    async fn test_admin_email_omitted_when_unset() {
        let (url, mut rx) = capture_server(StatusCode::OK).await;
        let channel = WebhookChannel::new(reqwest::Client::new(), url);
        channel.deliver(&message(FeedbackKind::ThumbsUp)).await.unwrap();
        let body = rx.recv().await.unwrap().body;
        assert_eq!(body["feedbackType"], "thumbs_up");
        assert!(body.get("adminEmail").is_none());
        assert!(body.get("emoji").is_none());
    }

    #[tokio::test]
    async fn test_non_2xx_is_an_error() {
        let (url, _rx) = capture_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let channel = WebhookChannel::new(reqwest::Client::new(), url);
        assert!(channel.deliver(&message(FeedbackKind::ThumbsUp)).await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let channel = WebhookChannel::new(reqwest::Client::new(), unreachable_url().await);
        assert!(channel.deliver(&message(FeedbackKind::ThumbsUp)).await.is_err());
    }
}
