//! WhatsApp adapter.
//!
//! Speaks HTTP/JSON to a WhatsApp Web gateway sidecar, which hosts the actual
//! browser session. Lifecycle events are long-polled from the gateway and
//! pushed into the connection manager's event channel.

use std::{path::PathBuf, sync::Mutex, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use tgwa_core::{
    errors::Error,
    messaging::{
        port::{EventSink, OutboundTransport},
        types::TransportEvent,
    },
    Result,
};

/// How long the gateway may hold an events request open.
const POLL_WAIT_SECS: u64 = 25;
/// Consecutive poll failures before the session is reported as disconnected.
const MAX_POLL_FAILURES: u32 = 3;

#[derive(Clone, Debug)]
pub struct GatewaySettings {
    pub base_url: String,
    pub session_name: String,
    pub auth_dir: PathBuf,
    pub request_timeout: Duration,
    pub poll_retry_delay: Duration,
}

impl GatewaySettings {
    pub fn new(
        base_url: impl Into<String>,
        session_name: impl Into<String>,
        auth_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_name: session_name.into(),
            auth_dir: auth_dir.into(),
            request_timeout: Duration::from_secs(30),
            poll_retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum GatewayEvent {
    Qr {
        data: String,
    },
    Authenticated,
    Ready,
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl GatewayEvent {
    fn into_transport_event(self) -> Option<TransportEvent> {
        match self {
            GatewayEvent::Qr { data } => Some(TransportEvent::PairingChallenge(data)),
            GatewayEvent::Authenticated => Some(TransportEvent::Authenticated),
            GatewayEvent::Ready => Some(TransportEvent::Ready),
            GatewayEvent::Disconnected { reason } => Some(TransportEvent::Disconnected(
                reason.unwrap_or_else(|| "unknown".to_string()),
            )),
            GatewayEvent::Unknown => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    client_id: &'a str,
    auth_dir: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

fn request_error(what: &'static str) -> impl Fn(reqwest::Error) -> Error {
    move |e| Error::External(format!("gateway {what} request error: {e}"))
}

async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(Error::External(format!(
        "gateway {what} failed: {status} {}",
        body.chars().take(200).collect::<String>()
    )))
}

#[derive(Clone, Debug)]
struct GatewayApi {
    http: reqwest::Client,
    session_url: String,
    request_timeout: Duration,
}

impl GatewayApi {
    async fn poll_events(&self) -> Result<Vec<GatewayEvent>> {
        let resp = self
            .http
            .get(format!("{}/events?wait={POLL_WAIT_SECS}", self.session_url))
            .timeout(Duration::from_secs(POLL_WAIT_SECS) + self.request_timeout)
            .send()
            .await
            .map_err(request_error("events"))?;
        let resp = check_status(resp, "events").await?;
        resp.json()
            .await
            .map_err(|e| Error::External(format!("gateway events json error: {e}")))
    }
}

async fn run_event_pump(
    api: GatewayApi,
    events: EventSink,
    cancel: CancellationToken,
    retry_delay: Duration,
) {
    let mut failures = 0u32;
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => return,
            r = api.poll_events() => r,
        };

        match polled {
            Ok(batch) => {
                failures = 0;
                for raw in batch {
                    let Some(event) = raw.into_transport_event() else {
                        tracing::debug!("ignoring unknown gateway event");
                        continue;
                    };
                    if events.send(event).is_err() {
                        // Manager is gone.
                        return;
                    }
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(failures, "gateway event poll failed: {e}");
                if failures >= MAX_POLL_FAILURES {
                    let _ = events.send(TransportEvent::Disconnected(format!(
                        "gateway unreachable: {e}"
                    )));
                    return;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }
}

/// [`OutboundTransport`] backed by a WhatsApp Web gateway session.
#[derive(Debug)]
pub struct GatewayTransport {
    api: GatewayApi,
    settings: GatewaySettings,
    pump: Mutex<Option<CancellationToken>>,
}

impl GatewayTransport {
    pub fn new(settings: GatewaySettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| Error::External(format!("failed to build HTTP client: {e}")))?;
        let api = GatewayApi {
            http,
            session_url: format!("{}/sessions/{}", settings.base_url, settings.session_name),
            request_timeout: settings.request_timeout,
        };
        Ok(Self {
            api,
            settings,
            pump: Mutex::new(None),
        })
    }

    fn stop_pump(&self) {
        let token = match self.pump.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(token) = token {
            token.cancel();
        }
    }
}

impl Drop for GatewayTransport {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

#[async_trait]
impl OutboundTransport for GatewayTransport {
    async fn start(&self, events: EventSink) -> Result<()> {
        self.stop_pump();

        let body = StartRequest {
            client_id: &self.settings.session_name,
            auth_dir: self.settings.auth_dir.display().to_string(),
        };
        let resp = self
            .api
            .http
            .post(format!("{}/start", self.api.session_url))
            .json(&body)
            .send()
            .await
            .map_err(request_error("start"))?;
        check_status(resp, "start").await?;

        let cancel = CancellationToken::new();
        match self.pump.lock() {
            Ok(mut g) => *g = Some(cancel.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(cancel.clone()),
        }
        tokio::spawn(run_event_pump(
            self.api.clone(),
            events,
            cancel,
            self.settings.poll_retry_delay,
        ));

        tracing::info!(session = %self.settings.session_name, "gateway session started");
        Ok(())
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<()> {
        let resp = self
            .api
            .http
            .post(format!("{}/messages", self.api.session_url))
            .json(&SendRequest {
                chat_id: address,
                text,
            })
            .send()
            .await
            .map_err(request_error("send"))?;
        check_status(resp, "send").await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.stop_pump();

        let result = self
            .api
            .http
            .delete(self.api.session_url.clone())
            .send()
            .await
            .map_err(request_error("shutdown"));
        match result {
            Ok(resp) => {
                if let Err(e) = check_status(resp, "shutdown").await {
                    tracing::warn!("{e}");
                }
            }
            Err(e) => tracing::warn!("{e}"),
        }
        tracing::info!(session = %self.settings.session_name, "gateway session released");
        Ok(())
    }

    fn auth_dir(&self) -> Option<PathBuf> {
        Some(self.settings.auth_dir.clone())
    }
}
