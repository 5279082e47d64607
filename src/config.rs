//! Service configuration.
//!
//! Read once at startup from `ideaboard.toml`, then from `IDEABOARD_*`
//! environment variables, then from CLI flags. Every section is optional.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3210
//! db_path = "data/ideaboard.db"
//! public_base_url = "https://ideas.example.com"
//!
//! [feedback]
//! max_per_window = 30
//! window_secs = 60
//!
//! [notifications]
//! timeout_secs = 10
//! admin_email = "owner@example.com"
//!
//! [notifications.email]
//! relay_url = "https://mail-relay.example.com/send"
//! api_key = "..."
//! from = "ideaboard@example.com"
//!
//! [notifications.chat]
//! webhook_url = "https://hooks.slack.com/services/..."
//!
//! [notifications.webhook]
//! url = "https://automation.example.com/ideaboard"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::board::gate::{DEFAULT_MAX_PER_WINDOW, DEFAULT_WINDOW_SECS};
use crate::board::notify::DEFAULT_CHANNEL_TIMEOUT_SECS;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "ideaboard.toml";

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Base of the links placed in notifications, e.g. `https://ideas.example.com`.
    pub public_base_url: Option<String>,
    /// Permissive CORS for a local front-end dev server.
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3210,
            db_path: PathBuf::from("data/ideaboard.db"),
            public_base_url: None,
            dev_mode: false,
        }
    }
}

/// Limits on anonymous feedback per (idea, origin).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackSection {
    pub max_per_window: u32,
    pub window_secs: u64,
}

impl Default for FeedbackSection {
    fn default() -> Self {
        Self {
            max_per_window: DEFAULT_MAX_PER_WINDOW,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSection {
    /// HTTP mail relay endpoint. Email is disabled when unset.
    pub relay_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
    /// Recipient; falls back to `notifications.admin_email`.
    pub to: Option<String>,
}

impl Default for EmailSection {
    fn default() -> Self {
        Self {
            relay_url: None,
            api_key: None,
            from: "ideaboard@localhost".to_string(),
            to: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSection {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    /// Deadline for a single channel delivery.
    pub timeout_secs: u64,
    pub admin_email: Option<String>,
    pub email: EmailSection,
    pub chat: ChatSection,
    pub webhook: WebhookSection,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_CHANNEL_TIMEOUT_SECS,
            admin_email: None,
            email: EmailSection::default(),
            chat: ChatSection::default(),
            webhook: WebhookSection::default(),
        }
    }
}

/// The complete ideaboard.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub feedback: FeedbackSection,
    pub notifications: NotificationsSection,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse ideaboard.toml")
    }

    /// Load `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// File, then process environment.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `IDEABOARD_*` overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = var("IDEABOARD_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid IDEABOARD_PORT '{}'", port))?;
        }
        if let Some(path) = var("IDEABOARD_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(url) = var("IDEABOARD_PUBLIC_BASE_URL") {
            self.server.public_base_url = Some(url);
        }
        if let Some(email) = var("IDEABOARD_ADMIN_EMAIL") {
            self.notifications.admin_email = Some(email);
        }
        if let Some(url) = var("IDEABOARD_EMAIL_RELAY_URL") {
            self.notifications.email.relay_url = Some(url);
        }
        if let Some(key) = var("IDEABOARD_EMAIL_API_KEY") {
            self.notifications.email.api_key = Some(key);
        }
        if let Some(to) = var("IDEABOARD_EMAIL_TO") {
            self.notifications.email.to = Some(to);
        }
        if let Some(url) = var("IDEABOARD_CHAT_WEBHOOK_URL") {
            self.notifications.chat.webhook_url = Some(url);
        }
        if let Some(url) = var("IDEABOARD_WEBHOOK_URL") {
            self.notifications.webhook.url = Some(url);
        }
        Ok(())
    }

    /// Copy safe to print: API keys and webhook paths are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let notifications = &mut copy.notifications;
        if notifications.email.api_key.is_some() {
            notifications.email.api_key = Some(REDACTED.to_string());
        }
        // Chat and generic webhook URLs carry their secret in the path.
        notifications.chat.webhook_url = notifications.chat.webhook_url.as_deref().map(redact_url);
        notifications.webhook.url = notifications.webhook.url.as_deref().map(redact_url);
        copy
    }

    /// Serialize as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Validate the configuration and return any problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.feedback.window_secs == 0 {
            problems.push("feedback.window_secs must be greater than 0".to_string());
        }
        if self.feedback.max_per_window == 0 {
            problems.push("feedback.max_per_window is 0: all feedback would be rejected".to_string());
        }
        if self.notifications.timeout_secs == 0 {
            problems.push("notifications.timeout_secs must be greater than 0".to_string());
        }

        let urls = [
            ("server.public_base_url", &self.server.public_base_url),
            ("notifications.email.relay_url", &self.notifications.email.relay_url),
            ("notifications.chat.webhook_url", &self.notifications.chat.webhook_url),
            ("notifications.webhook.url", &self.notifications.webhook.url),
        ];
        for (field, value) in urls {
            if let Some(url) = value
                && !is_http_url(url)
            {
                problems.push(format!("Invalid {} '{}': expected an http(s) URL", field, url));
            }
        }

        let email = &self.notifications.email;
        if email.relay_url.is_some() && email.to.is_none() && self.notifications.admin_email.is_none()
        {
            problems.push(
                "notifications.email.relay_url is set but no recipient (email.to or admin_email)"
                    .to_string(),
            );
        }

        problems
    }
}

fn is_http_url(raw: &str) -> bool {
    reqwest::Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

/// Keep scheme and host, hide the rest.
fn redact_url(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(url) => match url.host_str() {
            Some(host) => format!("{}://{}/{}", url.scheme(), host, REDACTED),
            None => REDACTED.to_string(),
        },
        Err(_) => REDACTED.to_string(),
    }
}
