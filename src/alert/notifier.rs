//! Alert delivery.

use crate::alert::Alert;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Alert delivery error.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook rejected alert with status {0}")]
    Rejected(u16),
}

/// Destination for alert messages.
pub trait AlertSink: Send + Sync + 'static {
    fn deliver(&self, message: &str) -> impl Future<Output = Result<(), AlertError>> + Send;
}

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    text: String,
    username: &'a str,
    icon_emoji: &'a str,
}

/// Posts alerts to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackSink {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, webhook_url))
    }

    pub fn with_client(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

impl AlertSink for SlackSink {
    async fn deliver(&self, message: &str) -> Result<(), AlertError> {
        let payload = SlackPayload {
            text: format!("*Blue/Green Alert*\n{}", message),
            username: "Blue/Green Monitor",
            icon_emoji: ":warning:",
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AlertError::Rejected(status.as_u16()))
        }
    }
}

/// Writes alerts to the log; used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    async fn deliver(&self, message: &str) -> Result<(), AlertError> {
        warn!(alert = %message, "operator alert");
        Ok(())
    }
}

/// Sink chosen from configuration.
#[derive(Debug, Clone)]
pub enum Notifier {
    Slack(SlackSink),
    Log(LogSink),
}

impl AlertSink for Notifier {
    async fn deliver(&self, message: &str) -> Result<(), AlertError> {
        match self {
            Notifier::Slack(sink) => sink.deliver(message).await,
            Notifier::Log(sink) => sink.deliver(message).await,
        }
    }
}

/// Result of handing an alert to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    Suppressed,
    Failed,
}

/// Delivers alerts, at most one per cooldown period.
///
/// The cooldown restarts only when a delivery succeeds.
pub struct AlertDispatcher<S> {
    sink: S,
    cooldown: Duration,
    last_delivered: Option<Instant>,
}

impl<S: AlertSink> AlertDispatcher<S> {
    pub fn new(sink: S, cooldown: Duration) -> Self {
        Self {
            sink,
            cooldown,
            last_delivered: None,
        }
    }

    pub async fn dispatch(&mut self, alert: &Alert, now: Instant) -> Dispatch {
        let message = alert.message();

        if let Some(last) = self.last_delivered {
            if now.saturating_duration_since(last) < self.cooldown {
                info!(alert = %message, "alert suppressed (cooldown)");
                return Dispatch::Suppressed;
            }
        }

        match self.sink.deliver(&message).await {
            Ok(()) => {
                info!(alert = %message, "alert sent");
                self.last_delivered = Some(now);
                Dispatch::Delivered
            }
            Err(e) => {
                error!(error = %e, alert = %message, "failed to send alert");
                Dispatch::Failed
            }
        }
    }
}
