//! Failover and error-rate detection over served requests.

use std::collections::VecDeque;
use std::time::SystemTime;

/// What the proxy answered for one client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedRecord {
    /// Pool that answered (`X-App-Pool`, else the backend name); `None` when
    /// no backend produced a response.
    pub pool: Option<String>,
    /// Status of every upstream attempt, in order.
    pub upstream_statuses: Vec<u16>,
    /// Status returned to the client.
    pub status: u16,
}

impl ServedRecord {
    /// Counted as an error when the first upstream attempt or the client
    /// response is a 5xx, so failovers show up in the error rate too.
    pub fn is_error(&self) -> bool {
        let first_upstream = self.upstream_statuses.first().copied();
        matches!(first_upstream, Some(500..=599)) || (500..=599).contains(&self.status)
    }
}

/// A condition worth telling an operator about.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    Failover {
        from: String,
        to: String,
        at: SystemTime,
    },
    HighErrorRate {
        rate: f64,
        threshold: f64,
        window: usize,
    },
}

impl Alert {
    pub fn message(&self) -> String {
        match self {
            Alert::Failover { from, to, at } => format!(
                "Failover detected: {} → {}\nTime: {}",
                from,
                to,
                humantime::format_rfc3339_seconds(*at)
            ),
            Alert::HighErrorRate {
                rate,
                threshold,
                window,
            } => format!(
                "High error rate: {:.1}% (threshold: {:.1}%)\nLast {} requests",
                rate, threshold, window
            ),
        }
    }
}

/// Tracks the serving pool and a sliding window of request errors.
#[derive(Debug)]
pub struct FailoverWatcher {
    last_pool: String,
    window: VecDeque<bool>,
    window_size: usize,
    error_rate_threshold: f64,
}

impl FailoverWatcher {
    pub fn new(active_pool: impl Into<String>, window_size: usize, error_rate_threshold: f64) -> Self {
        let window_size = window_size.max(1);
        Self {
            last_pool: active_pool.into(),
            window: VecDeque::with_capacity(window_size),
            window_size,
            error_rate_threshold,
        }
    }

    pub fn last_pool(&self) -> &str {
        &self.last_pool
    }

    /// Feed one served request; returns the alerts it triggers.
    pub fn observe(&mut self, record: &ServedRecord) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(record.is_error());

        if let Some(ref pool) = record.pool {
            if *pool != self.last_pool {
                alerts.push(Alert::Failover {
                    from: std::mem::replace(&mut self.last_pool, pool.clone()),
                    to: pool.clone(),
                    at: SystemTime::now(),
                });
            }
        }

        if self.window.len() >= self.window_size {
            let errors = self.window.iter().filter(|e| **e).count();
            let rate = errors as f64 * 100.0 / self.window.len() as f64;
            if rate > self.error_rate_threshold {
                alerts.push(Alert::HighErrorRate {
                    rate,
                    threshold: self.error_rate_threshold,
                    window: self.window_size,
                });
                self.window.clear();
            }
        }

        alerts
    }
}
