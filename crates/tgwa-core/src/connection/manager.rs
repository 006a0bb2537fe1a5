use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    connection::state::{transition, ConnectionRecord, ConnectionState, Effect, Input, RetryPolicy},
    errors::Error,
    messaging::{
        port::{EventSink, OutboundTransport},
        types::TransportEvent,
    },
    ports::{DeliveryPort, OperatorNotifier},
    session::SessionBridge,
    Result,
};

/// Cloneable failure so one in-flight result can be handed to every caller.
#[derive(Clone, Debug)]
enum InitFailure {
    Timeout(Duration),
    Failed(String),
    Destroyed,
}

impl From<InitFailure> for Error {
    fn from(f: InitFailure) -> Self {
        match f {
            InitFailure::Timeout(d) => Error::InitializationTimeout(d),
            InitFailure::Failed(cause) => Error::InitializationFailure(cause),
            InitFailure::Destroyed => Error::Destroyed,
        }
    }
}

type InitFuture = Shared<BoxFuture<'static, std::result::Result<(), InitFailure>>>;

#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub init_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

/// Owns the outbound client's lifecycle.
///
/// Lifecycle events from the transport arrive on an mpsc channel and are fed
/// through [`transition`]; the resulting effects (operator notifications,
/// timers, resource release) are run here. The router sees only the
/// [`DeliveryPort`] projection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn OutboundTransport>,
    notifier: Arc<dyn OperatorNotifier>,
    session: Option<SessionBridge>,
    settings: ConnectionSettings,

    record: Mutex<ConnectionRecord>,
    in_flight: Mutex<Option<(u64, InitFuture)>>,
    next_flight: AtomicU64,

    /// An underlying client exists (fully or partially) and needs releasing.
    transport_live: AtomicBool,
    session_restored: AtomicBool,

    events_tx: EventSink,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn OutboundTransport>,
        notifier: Arc<dyn OperatorNotifier>,
        session: Option<SessionBridge>,
        settings: ConnectionSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                transport,
                notifier,
                session,
                settings,
                record: Mutex::new(ConnectionRecord::default()),
                in_flight: Mutex::new(None),
                next_flight: AtomicU64::new(1),
                transport_live: AtomicBool::new(false),
                session_restored: AtomicBool::new(false),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.record().state
    }

    /// Read-only copy of the connection record.
    pub fn snapshot(&self) -> ConnectionRecord {
        self.record().clone()
    }

    pub fn pairing_challenge(&self) -> Option<String> {
        self.record().pairing_challenge.clone()
    }

    /// Start the outbound client.
    ///
    /// Single-flight: while an initialization is running, every caller awaits
    /// the same outcome and no second client is started. Calling it while the
    /// client is already up (pairing, authenticated, ready) is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let flight = {
            let mut slot = lock(&self.inner.in_flight);
            let existing = slot.as_ref().map(|(_, fut)| fut.clone());
            match existing {
                Some(fut) => fut,
                None => {
                    let state = self.state();
                    if state == ConnectionState::Destroyed {
                        return Err(Error::Destroyed);
                    }
                    if self.apply(Input::InitRequested).is_none() {
                        tracing::debug!(%state, "initialize skipped; client already running");
                        return Ok(());
                    }

                    let id = self.inner.next_flight.fetch_add(1, Ordering::SeqCst);
                    let mgr = self.clone();
                    let handle = tokio::spawn(async move { mgr.run_initialize(id).await });
                    let fut: InitFuture = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(InitFailure::Failed(format!("initialization task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some((id, fut.clone()));
                    fut
                }
            }
        };

        flight.await.map_err(Error::from)
    }

    /// Tear everything down. Safe from any state and any number of times.
    pub async fn destroy(&self) {
        let Some(effects) = self.apply(Input::Destroy) else {
            return;
        };
        self.inner.cancel.cancel();
        self.run_effects(effects).await;
    }

    /// Feed one lifecycle event through the state machine.
    pub async fn handle_event(&self, event: TransportEvent) {
        let input = match event {
            TransportEvent::PairingChallenge(p) => Input::PairingChallenge(p),
            TransportEvent::Authenticated => Input::Authenticated,
            TransportEvent::Ready => Input::Ready,
            TransportEvent::Disconnected(reason) => Input::Disconnected(reason),
        };
        self.apply_and_run(input).await;
    }

    async fn run_initialize(self, flight: u64) -> std::result::Result<(), InitFailure> {
        self.ensure_event_pump();
        self.restore_session_once().await;

        let budget = self.inner.settings.init_timeout;
        let started = tokio::time::timeout(
            budget,
            self.inner.transport.start(self.inner.events_tx.clone()),
        )
        .await;

        // Releasable only once start has returned: a destroy() racing the start
        // leaves the release to this flight.
        self.inner.transport_live.store(true, Ordering::SeqCst);

        let outcome = match started {
            _ if self.state() == ConnectionState::Destroyed => {
                self.release().await;
                Err(InitFailure::Destroyed)
            }
            Ok(Ok(())) => {
                tracing::info!("outbound client started");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!("outbound client failed to start: {e}");
                self.apply_and_run(Input::InitFailed(e.to_string())).await;
                Err(InitFailure::Failed(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(?budget, "outbound client start timed out");
                self.apply_and_run(Input::InitTimedOut(budget)).await;
                Err(InitFailure::Timeout(budget))
            }
        };

        let mut slot = lock(&self.inner.in_flight);
        if slot.as_ref().is_some_and(|(id, _)| *id == flight) {
            *slot = None;
        }
        outcome
    }

    async fn restore_session_once(&self) {
        let Some(bridge) = &self.inner.session else {
            return;
        };
        if self.inner.session_restored.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(dir) = self.inner.transport.auth_dir() {
            bridge.restore(&dir).await;
        }
    }

    fn apply(&self, input: Input) -> Option<Vec<Effect>> {
        let mut record = self.record();
        let before = record.state;
        let label = format!("{input:?}");
        let effects = transition(&mut record, input, &self.inner.settings.retry);
        match &effects {
            Some(_) if record.state != before => {
                tracing::info!(from = %before, to = %record.state, "connection state changed");
            }
            Some(_) => {}
            None => tracing::debug!(state = %before, input = %label, "lifecycle input ignored"),
        }
        effects
    }

    async fn apply_and_run(&self, input: Input) {
        if let Some(effects) = self.apply(input) {
            self.run_effects(effects).await;
        }
    }

    async fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ShowPairingChallenge(payload) => {
                    if let Err(e) = self.inner.notifier.show_pairing_challenge(&payload).await {
                        tracing::warn!("failed to show pairing challenge: {e}");
                    }
                }
                Effect::NotifyReady => {
                    if let Err(e) = self.inner.notifier.notify_ready().await {
                        tracing::warn!("failed to send ready notification: {e}");
                    }
                }
                Effect::NotifyDisconnected(reason) => {
                    if let Err(e) = self.inner.notifier.notify_disconnected(&reason).await {
                        tracing::warn!("failed to send disconnect notification: {e}");
                    }
                }
                Effect::NotifyWarning(message) => {
                    tracing::warn!("{message}");
                    if let Err(e) = self.inner.notifier.notify_warning(&message).await {
                        tracing::warn!("failed to send warning notification: {e}");
                    }
                }
                Effect::PersistSession => {
                    if let (Some(bridge), Some(dir)) =
                        (&self.inner.session, self.inner.transport.auth_dir())
                    {
                        bridge.save(&dir).await;
                    }
                }
                Effect::ReleaseResources => self.release().await,
                Effect::ScheduleRetry(delay) => self.schedule(delay, Input::RetryDue),
                Effect::ScheduleReconnect(delay) => self.schedule(delay, Input::ReconnectDue),
                Effect::StartInitialization => self.spawn_initialize(),
            }
        }
    }

    async fn release(&self) {
        if !self.inner.transport_live.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.inner.transport.shutdown().await {
            Ok(()) => tracing::info!("outbound client released"),
            Err(e) => tracing::warn!("error while releasing outbound client: {e}"),
        }
    }

    fn schedule(&self, delay: Duration, input: Input) {
        let mgr = self.clone();
        let cancel = self.inner.cancel.clone();
        tracing::info!(?delay, input = ?input, "scheduling lifecycle timer");
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => mgr.apply_and_run(input).await,
            }
        });
    }

    fn spawn_initialize(&self) {
        let mgr = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mgr.initialize().await {
                tracing::warn!("automatic initialization failed: {e}");
            }
        });
    }

    fn ensure_event_pump(&self) {
        let Some(mut rx) = lock(&self.inner.events_rx).take() else {
            return;
        };
        let mgr = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => mgr.handle_event(event).await,
                        None => break,
                    },
                }
            }
        });
    }

    fn record(&self) -> MutexGuard<'_, ConnectionRecord> {
        lock(&self.inner.record)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // The record stays consistent even if a holder panicked mid-read.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DeliveryPort for ConnectionManager {
    fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    async fn deliver(&self, address: &str, text: &str) -> Result<()> {
        let state = self.state();
        if state == ConnectionState::Destroyed {
            return Err(Error::NotReady(state));
        }
        self.inner
            .transport
            .send_text(address, text)
            .await
            .map_err(|e| {
                let cause = if state == ConnectionState::Ready {
                    e.to_string()
                } else {
                    format!("{e} (client {state})")
                };
                Error::Delivery {
                    destination: address.to_string(),
                    cause,
                }
            })
    }
}
