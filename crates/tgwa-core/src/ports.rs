use async_trait::async_trait;

use crate::{
    domain::{Channel, DeliveryRecord, DeliveryStats, DestinationGroup, ForwardingRule},
    Result,
};

/// Read side of the rule/history store, as consumed by the router.
///
/// Activity filtering (inactive channels, groups or rules) happens in the
/// store; callers treat every returned row as live.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_active_channels(&self) -> Result<Vec<Channel>>;
    async fn list_active_destinations(&self) -> Result<Vec<DestinationGroup>>;
    async fn list_active_rules(&self) -> Result<Vec<ForwardingRule>>;
    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<()>;
}

/// Operator-facing management of the rule set and delivery history.
#[async_trait]
pub trait RuleAdmin: RuleStore {
    /// Upsert; re-activates a previously deactivated channel.
    async fn add_channel(&self, external_id: &str, name: &str) -> Result<Channel>;
    async fn add_group(&self, external_id: &str, name: &str) -> Result<DestinationGroup>;
    /// Both sides must already be registered and active.
    async fn add_rule(&self, channel_id: &str, group_id: &str) -> Result<ForwardingRule>;
    async fn deactivate_channel(&self, external_id: &str) -> Result<bool>;
    async fn deactivate_group(&self, external_id: &str) -> Result<bool>;
    async fn deactivate_rule(&self, channel_id: &str, group_id: &str) -> Result<bool>;
    async fn message_stats(&self, days: u32) -> Result<DeliveryStats>;
    async fn clean_old_deliveries(&self, days: u32) -> Result<usize>;
}

/// Key/value settings (session snapshots and the like).
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}

/// Delivery capability handed to the router.
///
/// Exposes a read-only readiness projection; all connection state stays with
/// the lifecycle manager.
#[async_trait]
pub trait DeliveryPort: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn deliver(&self, address: &str, text: &str) -> Result<()>;
}

/// Where lifecycle news goes for a human to see.
///
/// Fire-and-forget from the manager's point of view: errors are logged and
/// never change connection state.
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn show_pairing_challenge(&self, payload: &str) -> Result<()>;
    async fn notify_ready(&self) -> Result<()>;
    async fn notify_disconnected(&self, reason: &str) -> Result<()>;
    async fn notify_warning(&self, message: &str) -> Result<()>;
}
