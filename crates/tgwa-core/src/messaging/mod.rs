//! Outbound transport abstraction and inbound post model.

pub mod port;
pub mod throttled;
pub mod types;
