//! Passive health tracking for pool backends.

mod state;
mod tracker;

pub use state::{HealthCell, HealthTransition, MAX_COOLDOWN};
pub use tracker::{BackendHealth, HealthPolicy, HealthTracker};
