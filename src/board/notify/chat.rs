use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::NotificationChannel;
use crate::board::models::NotificationMessage;

/// Slack-compatible incoming webhook.
pub struct ChatChannel {
    client: reqwest::Client,
    webhook_url: String,
}

#[derive(Debug, Serialize)]
struct ChatPayload {
    text: String,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct Attachment {
    color: &'static str,
    fields: Vec<Field>,
}

#[derive(Debug, Serialize)]
struct Field {
    title: &'static str,
    value: String,
    short: bool,
}

impl Field {
    fn new(title: &'static str, value: impl Into<String>, short: bool) -> Self {
        Self {
            title,
            value: value.into(),
            short,
        }
    }
}

fn payload(message: &NotificationMessage) -> ChatPayload {
    let mut fields = vec![
        Field::new("Board", &message.board_name, true),
        Field::new("Idea", &message.idea_title, true),
        Field::new("Feedback", message.feedback.to_string(), true),
        Field::new(
            "Time",
            message.at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            true,
        ),
    ];
    if let Some(link) = &message.board_link {
        fields.push(Field::new("Board link", link, false));
    }
    ChatPayload {
        text: message.summary(),
        attachments: vec![Attachment {
            color: "#36a64f",
            fields,
        }],
    }
}

impl ChatChannel {
    pub fn new(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for ChatChannel {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<()> {
        self.client
            .post(&self.webhook_url)
            .json(&payload(message))
            .send()
            .await
            .context("Failed to send chat webhook request")?
            .error_for_status()
            .context("Chat webhook returned error status")?;
        Ok(())
    }
}
