use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source channel identifier as reported by the inbound platform.
///
/// Either a numeric id (`-1001234567890`) or an alias (`@news`). The same
/// channel may be known under both forms.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

/// Destination group identifier (bare, or already suffixed with `@g.us`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

/// Inbound message id, opaque to the relay.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostId(pub String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A monitored broadcast channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub active: bool,
}

/// A destination group chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationGroup {
    pub id: GroupId,
    pub name: String,
    pub active: bool,
}

/// Active link from one channel to one destination group, joined with both
/// sides' identity and display names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardingRule {
    pub channel: Channel,
    pub destination: DestinationGroup,
    pub active: bool,
}

impl ForwardingRule {
    /// True if either identity form of the post's source equals the rule's channel id.
    pub fn matches_source(&self, numeric: &str, alias: Option<&str>) -> bool {
        let stored = self.channel.id.0.as_str();
        stored == numeric || alias.is_some_and(|a| a == stored)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one (post, destination) delivery attempt. Never updated once written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub post_id: PostId,
    pub channel_id: ChannelId,
    pub destination_id: String,
    pub content: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated delivery history over a time window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
}
