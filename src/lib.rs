//! bgproxy - a blue/green failover reverse proxy
//!
//! All traffic goes to the primary backend while it is healthy. Connect
//! errors, timeouts and retryable 5xx responses are retried on the next
//! backend within the same client request, and a backend that fails
//! repeatedly is taken out of rotation for a cooldown period.
//!
//! - Passive health tracking with lazy recovery
//! - Buffered, replayable request forwarding over HTTP/1.1
//! - Prometheus metrics
//! - Failover and error-rate alerts (Slack or log)

pub mod alert;
pub mod backend;
pub mod config;
pub mod frontend;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod util;

pub use config::Config;
