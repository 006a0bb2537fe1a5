use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;

use tgwa_core::{
    config::Config,
    connection::ConnectionManager,
    forwarding::ForwardingRouter,
    ports::{OperatorNotifier, RuleAdmin},
};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub connection: ConnectionManager,
    pub forwarder: Arc<ForwardingRouter>,
    pub admin: Arc<dyn RuleAdmin>,
    pub notifier: Arc<dyn OperatorNotifier>,
}

/// Long-poll Telegram until `shutdown` fires.
pub async fn run_polling(
    bot: Bot,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "telegram bot started"),
        Err(e) => tracing::warn!("telegram getMe failed: {e}"),
    }
    tracing::info!(admins = state.cfg.telegram_admin_ids.len(), "accepting admin commands");

    let handler = dptree::entry()
        .branch(Update::filter_channel_post().endpoint(handlers::handle_channel_post))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        match token.shutdown() {
            Ok(stopped) => stopped.await,
            Err(e) => tracing::debug!("dispatcher was not running: {e:?}"),
        }
    });

    dispatcher.dispatch().await;
    tracing::info!("telegram polling stopped");
    Ok(())
}
