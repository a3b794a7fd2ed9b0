//! Metrics collection and exposition.

mod collector;
mod server;

pub use collector::{ActiveRequestGuard, MetricsCollector};
pub use server::{MetricsServer, ScrapeHook};
