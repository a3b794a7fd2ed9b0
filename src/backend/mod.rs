//! Backend pool and failover routing.

mod pool;
mod router;

pub use pool::{Backend, Pool};
pub use router::{FailoverRouter, ForwardError, Forwarded};
