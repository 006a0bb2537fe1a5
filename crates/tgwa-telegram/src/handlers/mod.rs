//! Telegram update handlers.
//!
//! Channel posts are translated into core `InboundPost`s and routed; direct
//! messages are admin commands and go through authorization first.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use tgwa_core::security::is_authorized;

use crate::router::AppState;

mod channel_post;
mod commands;

pub use channel_post::to_inbound_post;

pub async fn handle_channel_post(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    channel_post::handle_channel_post(msg, state).await
}

/// Group members chatting near the bot never see a refusal; only direct messages do.
fn should_refuse_visibly(msg: &Message) -> bool {
    msg.chat.is_private()
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| u.id.0 as i64);

    if !is_authorized(user_id, &state.cfg.telegram_admin_ids) {
        tracing::warn!(user_id, chat = msg.chat.id.0, "unauthorized message ignored");
        if should_refuse_visibly(&msg) {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    "Unauthorized. Contact the bot owner for access.",
                )
                .await;
        }
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }
    }

    let _ = bot
        .send_message(msg.chat.id, "Send /help to see the available commands.")
        .await;
    Ok(())
}
