//! Outbound client connection lifecycle.

pub mod manager;
pub mod state;

pub use manager::{ConnectionManager, ConnectionSettings};
pub use state::{ConnectionRecord, ConnectionState, RetryPolicy};
