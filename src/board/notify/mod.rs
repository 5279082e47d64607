//! Feedback notification fan-out.
//!
//! One feedback event reaches the board's live viewers (animation, sent
//! before [`NotificationFanout::notify`] returns) and every configured
//! external channel. Each channel runs in its own task with its own timeout;
//! failures are logged and dropped, never retried and never returned to the
//! request that recorded the feedback.

pub mod chat;
pub mod email;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::broadcast::{BoardEvent, BroadcastDispatcher};
use super::models::{Board, FeedbackEvent, Idea, NotificationMessage};
use crate::config::AppConfig;

pub use chat::ChatChannel;
pub use email::EmailChannel;
pub use webhook::WebhookChannel;

/// Default per-channel deadline.
pub const DEFAULT_CHANNEL_TIMEOUT_SECS: u64 = 10;

/// An outbound notification target.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    async fn deliver(&self, message: &NotificationMessage) -> Result<()>;
}

/// How one channel delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed(String),
    TimedOut,
}

/// Join handles of the channel tasks spawned by one `notify` call.
///
/// Dropping it detaches the tasks; they still run to completion and log
/// their own outcome.
#[derive(Debug, Default)]
pub struct FanoutHandle {
    tasks: Vec<(&'static str, JoinHandle<DeliveryOutcome>)>,
}

impl FanoutHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every channel task. Results are informational only.
    pub async fn join(self) -> Vec<(&'static str, DeliveryOutcome)> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for (name, task) in self.tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => DeliveryOutcome::Failed(format!("task aborted: {}", e)),
            };
            outcomes.push((name, outcome));
        }
        outcomes
    }
}

pub struct NotificationFanout {
    dispatcher: BroadcastDispatcher,
    channels: Vec<Arc<dyn NotificationChannel>>,
    timeout: Duration,
    public_base_url: Option<String>,
    admin_email: Option<String>,
}

impl NotificationFanout {
    pub fn new(dispatcher: BroadcastDispatcher) -> Self {
        Self {
            dispatcher,
            channels: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_CHANNEL_TIMEOUT_SECS),
            public_base_url: None,
            admin_email: None,
        }
    }

    /// Build the fan-out with every channel enabled in the configuration.
    /// A channel is enabled when its URL is set.
    pub fn from_config(dispatcher: BroadcastDispatcher, config: &AppConfig) -> Result<Self> {
        let notifications = &config.notifications;
        let client = reqwest::Client::builder()
            .user_agent(concat!("ideaboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for notifications")?;

        let mut fanout = Self::new(dispatcher)
            .with_timeout(Duration::from_secs(notifications.timeout_secs));
        if let Some(base) = &config.server.public_base_url {
            fanout = fanout.with_public_base_url(base);
        }
        if let Some(admin) = &notifications.admin_email {
            fanout = fanout.with_admin_email(admin);
        }

        let email = &notifications.email;
        if let Some(relay_url) = &email.relay_url {
            match email.to.as_ref().or(notifications.admin_email.as_ref()) {
                Some(to) => {
                    fanout = fanout.with_channel(Arc::new(EmailChannel::new(
                        client.clone(),
                        relay_url,
                        email.api_key.clone(),
                        &email.from,
                        to,
                    )));
                }
                None => tracing::warn!("Email relay configured without a recipient; email disabled"),
            }
        }
        if let Some(url) = &notifications.chat.webhook_url {
            fanout = fanout.with_channel(Arc::new(ChatChannel::new(client.clone(), url)));
        }
        if let Some(url) = &notifications.webhook.url {
            fanout = fanout.with_channel(Arc::new(WebhookChannel::new(client, url)));
        }
        Ok(fanout)
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_timeout(mut self, deadline: Duration) -> Self {
        self.timeout = deadline;
        self
    }

    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_admin_email(mut self, email: impl Into<String>) -> Self {
        self.admin_email = Some(email.into());
        self
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn dispatcher(&self) -> &BroadcastDispatcher {
        &self.dispatcher
    }

    /// Copy out everything the channels need. Later edits to the board or
    /// idea do not reach messages already built.
    pub fn snapshot(&self, board: &Board, idea: &Idea, event: &FeedbackEvent) -> NotificationMessage {
        NotificationMessage {
            board_id: board.id,
            board_name: board.name.clone(),
            board_link: self
                .public_base_url
                .as_ref()
                .map(|base| format!("{}/boards/{}", base, board.id)),
            idea_id: idea.id,
            idea_title: idea.one_liner.clone(),
            feedback: event.kind.clone(),
            origin: event.origin.clone(),
            at: event.at,
            admin_email: self.admin_email.clone(),
        }
    }

    /// Announce one recorded feedback event.
    ///
    /// The live animation is enqueued to viewers before this returns. Channel
    /// deliveries are spawned and left running; must be called from within a
    /// tokio runtime.
    pub fn notify(&self, board: &Board, idea: &Idea, event: &FeedbackEvent) -> FanoutHandle {
        let message = Arc::new(self.snapshot(board, idea, event));

        self.dispatcher.broadcast(
            board,
            &BoardEvent::FeedbackAnimation {
                idea_id: event.idea_id,
                feedback: event.kind.clone(),
                timestamp: event.at,
            },
        );

        let tasks = self
            .channels
            .iter()
            .map(|channel| {
                let channel = Arc::clone(channel);
                let message = Arc::clone(&message);
                let deadline = self.timeout;
                let name = channel.name();
                (name, tokio::spawn(deliver_one(channel, message, deadline)))
            })
            .collect();
        FanoutHandle { tasks }
    }
}

async fn deliver_one(
    channel: Arc<dyn NotificationChannel>,
    message: Arc<NotificationMessage>,
    deadline: Duration,
) -> DeliveryOutcome {
    let outcome = match timeout(deadline, channel.deliver(&message)).await {
        Ok(Ok(())) => DeliveryOutcome::Sent,
        Ok(Err(e)) => DeliveryOutcome::Failed(format!("{:#}", e)),
        Err(_) => DeliveryOutcome::TimedOut,
    };
    match &outcome {
        DeliveryOutcome::Sent => tracing::debug!(
            channel = channel.name(),
            board_id = message.board_id,
            idea_id = message.idea_id,
            "Notification delivered"
        ),
        DeliveryOutcome::Failed(error) => tracing::warn!(
            channel = channel.name(),
            board_id = message.board_id,
            idea_id = message.idea_id,
            %error,
            "Notification delivery failed"
        ),
        DeliveryOutcome::TimedOut => tracing::warn!(
            channel = channel.name(),
            board_id = message.board_id,
            idea_id = message.idea_id,
            timeout_secs = deadline.as_secs_f64(),
            "Notification delivery timed out"
        ),
    }
    outcome
}
