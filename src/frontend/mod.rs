//! Client-facing HTTP listener.
//!
//! Accepts client connections, buffers each request and hands it to the
//! failover router.

mod http;
mod listener;

pub use listener::FrontendListener;
