use std::{sync::Arc, time::Duration};

use tokio::sync::RwLock;

use crate::{
    domain::ForwardingRule,
    errors::Error,
    formatting::{compose_forward, format_group_address, normalize_content},
    forwarding::delivery_log::DeliveryLogger,
    messaging::types::InboundPost,
    ports::{DeliveryPort, RuleStore},
    Result,
};

#[derive(Clone, Debug)]
pub struct RouterSettings {
    /// Appended to bare destination ids (`@g.us` for WhatsApp groups).
    pub group_suffix: String,
    /// Upper bound for one delivery call; `None` trusts the transport.
    pub delivery_timeout: Option<Duration>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            group_suffix: "@g.us".to_string(),
            delivery_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Per-post fan-out summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub matched: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Fans inbound posts out to every destination linked to the source channel.
///
/// The rule cache is refreshed before each fan-out; rule sets are small and
/// change rarely, so freshness wins over caching.
pub struct ForwardingRouter {
    store: Arc<dyn RuleStore>,
    courier: Arc<dyn DeliveryPort>,
    log: DeliveryLogger,
    settings: RouterSettings,
    rules: RwLock<Vec<ForwardingRule>>,
}

impl ForwardingRouter {
    pub fn new(
        store: Arc<dyn RuleStore>,
        courier: Arc<dyn DeliveryPort>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            log: DeliveryLogger::new(store.clone()),
            store,
            courier,
            settings,
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Pull the active rule set into the cache. Returns the number of rules.
    pub async fn load_rules(&self) -> Result<usize> {
        let rules = self.store.list_active_rules().await?;
        let n = rules.len();
        *self.rules.write().await = rules;
        tracing::debug!(rules = n, "forwarding rules loaded");
        Ok(n)
    }

    pub async fn cached_rules(&self) -> Vec<ForwardingRule> {
        self.rules.read().await.clone()
    }

    /// Deliver one post to all matching destinations.
    ///
    /// Never fails: a destination that errors is recorded as failed and the
    /// fan-out moves on to the next one.
    pub async fn route(&self, post: &InboundPost) -> RouteReport {
        if let Err(e) = self.load_rules().await {
            tracing::warn!("failed to refresh forwarding rules, using cached set: {e}");
        }

        let matched: Vec<ForwardingRule> = {
            let rules = self.rules.read().await;
            rules
                .iter()
                .filter(|r| r.matches_source(&post.channel_id.0, post.alias()))
                .cloned()
                .collect()
        };

        let mut report = RouteReport {
            matched: matched.len(),
            ..Default::default()
        };
        if matched.is_empty() {
            tracing::info!(
                channel = %post.channel_id,
                alias = post.alias().unwrap_or("-"),
                message_id = %post.post_id,
                "no forwarding rule for channel; dropping post"
            );
            return report;
        }

        let canonical = normalize_content(&post.content);
        if !self.courier.is_ready() {
            tracing::warn!(
                message_id = %post.post_id,
                "outbound client not ready; attempting delivery anyway"
            );
        }

        for rule in &matched {
            let address = format_group_address(&rule.destination.id.0, &self.settings.group_suffix);
            let text = compose_forward(&rule.channel.name, &canonical);

            let outcome = self.deliver(&address, &text).await;
            match &outcome {
                Ok(()) => {
                    report.sent += 1;
                    tracing::info!(
                        channel = %rule.channel.name,
                        destination = %rule.destination.name,
                        message_id = %post.post_id,
                        "post forwarded"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        channel = %rule.channel.name,
                        destination = %address,
                        message_id = %post.post_id,
                        "forwarding failed: {e}"
                    );
                }
            }

            self.log
                .record(
                    &post.post_id,
                    &post.channel_id,
                    &address,
                    &canonical,
                    outcome.map_err(|e| e.to_string()),
                )
                .await;
        }

        report
    }

    async fn deliver(&self, address: &str, text: &str) -> Result<()> {
        let send = self.courier.deliver(address, text);
        match self.settings.delivery_timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Delivery {
                        destination: address.to_string(),
                        cause: format!("timed out after {limit:?}"),
                    })
                }),
            None => send.await,
        }
    }
}
