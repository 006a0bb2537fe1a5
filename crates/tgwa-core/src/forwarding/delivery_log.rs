use std::sync::Arc;

use chrono::Utc;

use crate::{
    domain::{ChannelId, DeliveryRecord, DeliveryStatus, PostId},
    ports::RuleStore,
};

/// Writes one outcome row per (post, destination) attempt.
///
/// Best-effort: a store failure is logged and dropped, never retried, and
/// never reported back to the router.
#[derive(Clone)]
pub struct DeliveryLogger {
    store: Arc<dyn RuleStore>,
}

impl DeliveryLogger {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        post_id: &PostId,
        channel_id: &ChannelId,
        destination: &str,
        content: &str,
        outcome: Result<(), String>,
    ) {
        let (status, error) = match outcome {
            Ok(()) => (DeliveryStatus::Sent, None),
            Err(e) => (DeliveryStatus::Failed, Some(e)),
        };
        let record = DeliveryRecord {
            post_id: post_id.clone(),
            channel_id: channel_id.clone(),
            destination_id: destination.to_string(),
            content: content.to_string(),
            status,
            error,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.store.record_delivery(&record).await {
            tracing::warn!(
                message_id = %post_id,
                destination,
                status = %status,
                "failed to record delivery: {e}"
            );
        }
    }
}
