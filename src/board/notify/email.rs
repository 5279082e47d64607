//! Email notifications through an HTTP mail relay.
//!
//! The relay accepts `{from, to, subject, text}` as JSON and authenticates
//! with a bearer key, which is how most transactional mail APIs work.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::NotificationChannel;
use crate::board::models::NotificationMessage;

pub struct EmailChannel {
    client: reqwest::Client,
    relay_url: String,
    api_key: Option<String>,
    from: String,
    to: String,
}

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    text: String,
}

fn subject(message: &NotificationMessage) -> String {
    format!("New feedback on \"{}\"", message.idea_title)
}

fn body(message: &NotificationMessage) -> String {
    let mut text = format!(
        "{}\n\nBoard: {}\nIdea: {}\nFeedback: {}\nFrom: {}\nTime: {}\n",
        message.summary(),
        message.board_name,
        message.idea_title,
        message.feedback,
        message.origin,
        message.at.to_rfc3339(),
    );
    if let Some(link) = &message.board_link {
        text.push_str(&format!("\nOpen the board: {}\n", link));
    }
    text
}

impl EmailChannel {
    pub fn new(
        client: reqwest::Client,
        relay_url: impl Into<String>,
        api_key: Option<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            client,
            relay_url: relay_url.into(),
            api_key,
            from: from.into(),
            to: to.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<()> {
        let request = RelayRequest {
            from: &self.from,
            to: &self.to,
            subject: subject(message),
            text: body(message),
        };
        let mut builder = self.client.post(&self.relay_url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
            .send()
            .await
            .context("Failed to send mail relay request")?
            .error_for_status()
            .context("Mail relay returned error status")?;
        Ok(())
    }
}
