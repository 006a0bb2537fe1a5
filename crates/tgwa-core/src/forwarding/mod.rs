//! Channel → destination fan-out and its audit trail.

pub mod delivery_log;
pub mod router;

pub use delivery_log::DeliveryLogger;
pub use router::{ForwardingRouter, RouteReport, RouterSettings};
