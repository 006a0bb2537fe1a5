use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{messaging::types::TransportEvent, Result};

/// Sender half handed to the transport for lifecycle events.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Outbound messaging client (WhatsApp today).
///
/// The lifecycle manager owns the only handle that calls `start`/`shutdown`;
/// everything else goes through `send_text`.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Construct and connect the underlying client. Lifecycle events
    /// (pairing challenge, authenticated, ready, disconnected) are pushed to
    /// `events` for as long as the client lives.
    async fn start(&self, events: EventSink) -> Result<()>;

    async fn send_text(&self, address: &str, text: &str) -> Result<()>;

    /// Release the underlying client. Must tolerate being called on a
    /// partially started client.
    async fn shutdown(&self) -> Result<()>;

    /// Local authentication-state directory, if the client keeps one.
    fn auth_dir(&self) -> Option<PathBuf> {
        None
    }
}
