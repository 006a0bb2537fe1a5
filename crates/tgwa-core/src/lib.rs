//! Core domain + application logic for the Telegram → WhatsApp relay.
//!
//! This crate is intentionally framework-agnostic. Telegram, the WhatsApp
//! gateway and SQLite live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod connection;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod forwarding;
pub mod logging;
pub mod messaging;
pub mod ports;
pub mod security;
pub mod session;
pub mod utils;

pub use errors::{Error, Result};
