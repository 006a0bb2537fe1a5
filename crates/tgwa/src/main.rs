use std::sync::Arc;

use teloxide::Bot;
use tokio_util::sync::CancellationToken;

use tgwa_core::{
    config::Config,
    connection::ConnectionManager,
    forwarding::ForwardingRouter,
    messaging::{port::OutboundTransport, throttled::ThrottledTransport},
    ports::{DeliveryPort, OperatorNotifier, RuleAdmin, SettingsStore},
    session::SessionBridge,
};
use tgwa_store_sqlite::SqliteStore;
use tgwa_telegram::{router::AppState, TelegramNotifier};
use tgwa_whatsapp::{GatewaySettings, GatewayTransport};

mod health;

#[tokio::main]
async fn main() -> Result<(), tgwa_core::Error> {
    tgwa_core::logging::init("tgwa")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        service = health::SERVICE_NAME,
        version = env!("CARGO_PKG_VERSION"),
        gateway = %cfg.whatsapp_gateway_url,
        database = %cfg.database_path.display(),
        "starting relay"
    );

    let store = Arc::new(SqliteStore::open(&cfg.database_path).await?);

    let settings: Arc<dyn SettingsStore> = store.clone();
    let session = SessionBridge::new(Some(settings), cfg.whatsapp_session_data.clone());

    let gateway = GatewayTransport::new(GatewaySettings::new(
        cfg.whatsapp_gateway_url.clone(),
        cfg.whatsapp_session_name.clone(),
        cfg.whatsapp_auth_dir.clone(),
    ))?;
    let transport: Arc<dyn OutboundTransport> = Arc::new(ThrottledTransport::new(
        Arc::new(gateway),
        cfg.throttle_config(),
    ));

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let notifier: Arc<dyn OperatorNotifier> = Arc::new(TelegramNotifier::new(
        bot.clone(),
        cfg.telegram_admin_ids.clone(),
    ));

    let connection = ConnectionManager::new(
        transport,
        notifier.clone(),
        Some(session),
        cfg.connection_settings(),
    );
    let courier: Arc<dyn DeliveryPort> = Arc::new(connection.clone());
    let forwarder = Arc::new(ForwardingRouter::new(
        store.clone(),
        courier,
        cfg.router_settings(),
    ));
    match forwarder.load_rules().await {
        Ok(n) => tracing::info!(rules = n, "forwarding rules loaded"),
        Err(e) => tracing::warn!("failed to load forwarding rules: {e}"),
    }

    let shutdown = CancellationToken::new();

    if let Some(port) = cfg.health_port {
        match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                let (conn, token) = (connection.clone(), shutdown.clone());
                tokio::spawn(async move {
                    if let Err(e) = health::serve(listener, conn, token).await {
                        tracing::error!("health endpoint stopped: {e}");
                    }
                });
            }
            Err(e) => tracing::warn!(port, "health endpoint disabled, bind failed: {e}"),
        }
    }

    {
        let connection = connection.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.initialize().await {
                tracing::error!("whatsapp initialization failed: {e}; use /login to retry");
            }
        });
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for ctrl-c: {e}");
                return;
            }
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    let admin: Arc<dyn RuleAdmin> = store;
    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        connection: connection.clone(),
        forwarder,
        admin,
        notifier,
    });

    let polled = tgwa_telegram::router::run_polling(bot, state, shutdown.clone()).await;

    shutdown.cancel();
    connection.destroy().await;
    tracing::info!("relay stopped");

    polled.map_err(|e| tgwa_core::Error::External(format!("telegram bot failed: {e}")))
}
