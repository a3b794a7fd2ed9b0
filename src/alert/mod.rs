//! Operator alerts on failovers and elevated error rates.
//!
//! The frontend offers a [`ServedRecord`] per request through an
//! [`AlertHandle`]; a background task runs the [`FailoverWatcher`] and hands
//! whatever it raises to an [`AlertDispatcher`].

mod notifier;
mod watcher;

pub use notifier::{AlertDispatcher, AlertError, AlertSink, Dispatch, LogSink, Notifier, SlackSink};
pub use watcher::{Alert, FailoverWatcher, ServedRecord};

use crate::config::AlertConfig;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Records buffered between the frontend and the watcher task.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Non-blocking entry point for served requests.
#[derive(Debug, Clone)]
pub struct AlertHandle {
    tx: mpsc::Sender<ServedRecord>,
}

impl AlertHandle {
    /// Offer a record to the watcher; dropped if the watcher is behind.
    pub fn observe(&self, record: ServedRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("alert channel full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("alert watcher stopped, dropping record");
            }
        }
    }
}

/// Run the watcher on its own task until shutdown.
pub fn spawn_watcher<S: AlertSink>(
    mut watcher: FailoverWatcher,
    mut dispatcher: AlertDispatcher<S>,
    capacity: usize,
    mut shutdown: broadcast::Receiver<()>,
) -> (AlertHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::spawn(async move {
        info!(pool = %watcher.last_pool(), "alert watcher started");

        loop {
            tokio::select! {
                record = rx.recv() => {
                    let Some(record) = record else { break };
                    for alert in watcher.observe(&record) {
                        dispatcher.dispatch(&alert, Instant::now()).await;
                    }
                }

                _ = shutdown.recv() => {
                    info!("alert watcher shutting down");
                    break;
                }
            }
        }
    });

    (AlertHandle { tx }, handle)
}

/// Build the sink and watcher described by `config` and spawn them.
///
/// Returns `None` when alerting is disabled.
pub fn spawn_from_config(
    config: &AlertConfig,
    default_pool: &str,
    shutdown: broadcast::Receiver<()>,
) -> Result<Option<(AlertHandle, JoinHandle<()>)>, AlertError> {
    if !config.enabled {
        return Ok(None);
    }

    let notifier = match config.slack_webhook_url {
        Some(ref url) => Notifier::Slack(SlackSink::new(url.clone())?),
        None => {
            info!("no slack webhook configured, alerts will only be logged");
            Notifier::Log(LogSink)
        }
    };

    let active_pool = config.active_pool.as_deref().unwrap_or(default_pool);
    let watcher = FailoverWatcher::new(active_pool, config.window_size, config.error_rate_threshold);
    let dispatcher = AlertDispatcher::new(notifier, config.cooldown);

    Ok(Some(spawn_watcher(
        watcher,
        dispatcher,
        DEFAULT_CHANNEL_CAPACITY,
        shutdown,
    )))
}
