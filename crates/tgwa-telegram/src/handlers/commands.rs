use std::sync::Arc;

use teloxide::{prelude::*, types::ParseMode};

use tgwa_core::{
    connection::ConnectionState,
    errors::Error,
    formatting::escape_html,
    utils::{parse_days, truncate_text},
};

use crate::{pairing_message, router::AppState};

/// Telegram hard limit is 4096; leave room for entities.
const MESSAGE_SAFE_LIMIT: usize = 4000;
const NAME_MAX_LEN: usize = 64;
const DEFAULT_STATS_DAYS: u32 = 7;

const HELP: &str = "🤖 <b>Telegram → WhatsApp relay</b>\n\n\
<b>📋 Commands:</b>\n\
/login - Log in to WhatsApp (QR code)\n\
/status - Connection and rule status\n\
/addchannel &lt;channel_id&gt; &lt;name&gt; - Watch a channel\n\
/addgroup &lt;group_id&gt; &lt;name&gt; - Register a WhatsApp group\n\
/addrule &lt;channel_id&gt; &lt;group_id&gt; - Forward a channel to a group\n\
/removerule &lt;channel_id&gt; &lt;group_id&gt; - Stop forwarding\n\
/removechannel &lt;channel_id&gt; - Stop watching a channel\n\
/removegroup &lt;group_id&gt; - Disable a group\n\
/listrules - Show forwarding rules\n\
/listchannels - Show watched channels\n\
/listgroups - Show WhatsApp groups\n\
/stats [days] - Delivery statistics\n\
/cleanup [days] - Drop old delivery history\n\n\
<b>💡 Example:</b>\n\
<code>/addchannel @mychannel My Channel</code>\n\
<code>/addgroup 120363012345678901 Family</code>\n\
<code>/addrule @mychannel 120363012345678901</code>";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Split `id rest of the name` into its two parts.
fn id_and_rest(arg: &str) -> Option<(&str, &str)> {
    let mut parts = arg.trim().splitn(2, char::is_whitespace);
    let id = parts.next().filter(|s| !s.is_empty())?;
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty())?;
    Some((id, rest))
}

fn two_ids(arg: &str) -> Option<(&str, &str)> {
    let mut parts = arg.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    }
}

fn name(s: &str) -> String {
    escape_html(&truncate_text(s, NAME_MAX_LEN))
}

fn failure(e: &Error) -> String {
    match e {
        Error::Persistence(m) => format!("❌ {}", escape_html(m)),
        other => format!("❌ {}", escape_html(&other.to_string())),
    }
}

/// Split on line boundaries so no chunk exceeds `limit` bytes.
fn split_lines(text: &str, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut chunk = String::new();
    for line in text.lines() {
        if !chunk.is_empty() && chunk.len() + line.len() + 1 > limit {
            out.push(std::mem::take(&mut chunk));
        }
        if !chunk.is_empty() {
            chunk.push('\n');
        }
        chunk.push_str(line);
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}

async fn refresh_rules(state: &AppState) {
    if let Err(e) = state.forwarder.load_rules().await {
        tracing::warn!("failed to reload forwarding rules: {e}");
    }
}

async fn login(state: &AppState) -> String {
    match state.connection.state() {
        ConnectionState::Ready => "✅ WhatsApp is already connected.".to_string(),
        ConnectionState::Destroyed => "⛔ The relay is shutting down.".to_string(),
        ConnectionState::AwaitingPairing => match state.connection.pairing_challenge() {
            Some(challenge) => pairing_message(&challenge),
            None => "⏳ Waiting for a QR code from WhatsApp...".to_string(),
        },
        _ => {
            // Initialization can take minutes; the QR code arrives through the notifier.
            let connection = state.connection.clone();
            tokio::spawn(async move {
                if let Err(e) = connection.initialize().await {
                    tracing::warn!("login-triggered initialization failed: {e}");
                }
            });
            "🔄 Starting WhatsApp login. A QR code will be sent here shortly.".to_string()
        }
    }
}

async fn status(state: &AppState) -> String {
    let record = state.connection.snapshot();
    let icon = match record.state {
        ConnectionState::Ready => "🟢",
        ConnectionState::AwaitingPairing | ConnectionState::Authenticated => "🟡",
        ConnectionState::Initializing | ConnectionState::Reconnecting => "🔄",
        _ => "🔴",
    };

    let mut lines = vec![
        "📊 <b>Relay Status</b>\n".to_string(),
        format!("{icon} WhatsApp: {}", record.state),
    ];
    if record.pairing_challenge.is_some() {
        lines.push("   └─ QR code pending, use /login to see it".to_string());
    }
    if record.retry_count > 0 || record.reconnect_count > 0 {
        lines.push(format!(
            "   └─ retries: {} | reconnects: {}",
            record.retry_count, record.reconnect_count
        ));
    }

    let channels = state.admin.list_active_channels().await.map(|v| v.len());
    let groups = state.admin.list_active_destinations().await.map(|v| v.len());
    let rules = state.admin.list_active_rules().await.map(|v| v.len());
    match (channels, groups, rules) {
        (Ok(c), Ok(g), Ok(r)) => {
            lines.push(format!("\n📡 Channels: {c}"));
            lines.push(format!("👥 Groups: {g}"));
            lines.push(format!("🔀 Rules: {r}"));
        }
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => lines.push(failure(&e)),
    }
    lines.join("\n")
}

/// Run one admin command and produce its HTML reply.
pub(crate) async fn execute(state: &AppState, cmd: &str, arg: &str) -> String {
    match cmd {
        "start" | "help" => HELP.to_string(),

        "login" => login(state).await,

        "status" => status(state).await,

        "addchannel" => {
            let Some((id, channel_name)) = id_and_rest(arg) else {
                return "Usage: /addchannel &lt;channel_id&gt; &lt;name&gt;\nExample: <code>/addchannel @mychannel My Channel</code>".to_string();
            };
            match state.admin.add_channel(id, channel_name).await {
                Ok(ch) => format!(
                    "✅ Channel added: <b>{}</b> (<code>{}</code>)",
                    name(&ch.name),
                    escape_html(&ch.id.0)
                ),
                Err(e) => failure(&e),
            }
        }

        "addgroup" => {
            let Some((id, group_name)) = id_and_rest(arg) else {
                return "Usage: /addgroup &lt;group_id&gt; &lt;name&gt;\nExample: <code>/addgroup 120363012345678901 Family</code>".to_string();
            };
            match state.admin.add_group(id, group_name).await {
                Ok(g) => format!(
                    "✅ Group added: <b>{}</b> (<code>{}</code>)",
                    name(&g.name),
                    escape_html(&g.id.0)
                ),
                Err(e) => failure(&e),
            }
        }

        "addrule" => {
            let Some((channel_id, group_id)) = two_ids(arg) else {
                return "Usage: /addrule &lt;channel_id&gt; &lt;group_id&gt;".to_string();
            };
            let reply = match state.admin.add_rule(channel_id, group_id).await {
                Ok(rule) => format!(
                    "✅ Forwarding <b>{}</b> → <b>{}</b>",
                    name(&rule.channel.name),
                    name(&rule.destination.name)
                ),
                Err(e) => failure(&e),
            };
            refresh_rules(state).await;
            reply
        }

        "removerule" => {
            let Some((channel_id, group_id)) = two_ids(arg) else {
                return "Usage: /removerule &lt;channel_id&gt; &lt;group_id&gt;".to_string();
            };
            let reply = match state.admin.deactivate_rule(channel_id, group_id).await {
                Ok(true) => "✅ Forwarding rule removed.".to_string(),
                Ok(false) => "ℹ️ No such forwarding rule.".to_string(),
                Err(e) => failure(&e),
            };
            refresh_rules(state).await;
            reply
        }

        "removechannel" | "removegroup" => {
            let id = arg.split_whitespace().next().unwrap_or("");
            if id.is_empty() {
                return format!("Usage: /{cmd} &lt;id&gt;");
            }
            let result = if cmd == "removechannel" {
                state.admin.deactivate_channel(id).await
            } else {
                state.admin.deactivate_group(id).await
            };
            let reply = match result {
                Ok(true) => format!("✅ <code>{}</code> disabled.", escape_html(id)),
                Ok(false) => format!("ℹ️ <code>{}</code> is not registered.", escape_html(id)),
                Err(e) => failure(&e),
            };
            refresh_rules(state).await;
            reply
        }

        "listrules" => match state.admin.list_active_rules().await {
            Ok(rules) if rules.is_empty() => "No forwarding rules yet. Use /addrule.".to_string(),
            Ok(rules) => {
                let mut lines = vec!["🔀 <b>Forwarding rules</b>\n".to_string()];
                lines.extend(rules.iter().map(|r| {
                    format!(
                        "• {} (<code>{}</code>) → {} (<code>{}</code>)",
                        name(&r.channel.name),
                        escape_html(&r.channel.id.0),
                        name(&r.destination.name),
                        escape_html(&r.destination.id.0)
                    )
                }));
                lines.join("\n")
            }
            Err(e) => failure(&e),
        },

        "listchannels" => match state.admin.list_active_channels().await {
            Ok(channels) if channels.is_empty() => {
                "No channels yet. Use /addchannel.".to_string()
            }
            Ok(channels) => {
                let mut lines = vec!["📡 <b>Channels</b>\n".to_string()];
                lines.extend(channels.iter().map(|c| {
                    format!("• {} (<code>{}</code>)", name(&c.name), escape_html(&c.id.0))
                }));
                lines.join("\n")
            }
            Err(e) => failure(&e),
        },

        "listgroups" => match state.admin.list_active_destinations().await {
            Ok(groups) if groups.is_empty() => "No groups yet. Use /addgroup.".to_string(),
            Ok(groups) => {
                let mut lines = vec!["👥 <b>WhatsApp groups</b>\n".to_string()];
                lines.extend(groups.iter().map(|g| {
                    format!("• {} (<code>{}</code>)", name(&g.name), escape_html(&g.id.0))
                }));
                lines.join("\n")
            }
            Err(e) => failure(&e),
        },

        "stats" => {
            let days = parse_days(arg.split_whitespace().next(), DEFAULT_STATS_DAYS);
            match state.admin.message_stats(days).await {
                Ok(s) => format!(
                    "📈 <b>Last {days} day(s)</b>\n\nTotal: {}\nSent: {}\nFailed: {}",
                    s.total, s.sent, s.failed
                ),
                Err(e) => failure(&e),
            }
        }

        "cleanup" => {
            let days = parse_days(
                arg.split_whitespace().next(),
                state.cfg.history_retention_days,
            );
            match state.admin.clean_old_deliveries(days).await {
                Ok(n) => format!("🧹 Removed {n} delivery record(s) older than {days} day(s)."),
                Err(e) => failure(&e),
            }
        }

        _ => "Unknown command. Send /help for the list.".to_string(),
    }
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let (cmd, arg) = parse_command(text);
    tracing::info!(command = %cmd, user_id = msg.from().map(|u| u.id.0), "admin command");

    let reply = execute(&state, &cmd, &arg).await;
    for chunk in split_lines(&reply, MESSAGE_SAFE_LIMIT) {
        if let Err(e) = bot
            .send_message(msg.chat.id, chunk)
            .parse_mode(ParseMode::Html)
            .await
        {
            tracing::warn!(command = %cmd, "failed to send command reply: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tgwa_core::{
        config::Config,
        connection::{ConnectionManager, ConnectionSettings},
        forwarding::{ForwardingRouter, RouterSettings},
        messaging::port::{EventSink, OutboundTransport},
        ports::{OperatorNotifier, RuleAdmin},
        Result,
    };
    use tgwa_store_sqlite::SqliteStore;

    #[derive(Default)]
    struct IdleTransport {
        starts: AtomicUsize,
    }

    #[async_trait]
    impl OutboundTransport for IdleTransport {
        async fn start(&self, _events: EventSink) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn send_text(&self, _address: &str, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    struct SilentNotifier;

    #[async_trait]
    impl OperatorNotifier for SilentNotifier {
        async fn show_pairing_challenge(&self, _payload: &str) -> Result<()> {
            Ok(())
        }
        async fn notify_ready(&self) -> Result<()> {
            Ok(())
        }
        async fn notify_disconnected(&self, _reason: &str) -> Result<()> {
            Ok(())
        }
        async fn notify_warning(&self, _message: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn state() -> (AppState, Arc<IdleTransport>) {
        let cfg = Config::from_lookup(|k| match k {
            "TELEGRAM_BOT_TOKEN" => Some("1:x".to_string()),
            "TELEGRAM_ADMIN_IDS" => Some("42".to_string()),
            _ => None,
        })
        .unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let transport = Arc::new(IdleTransport::default());
        let notifier: Arc<dyn OperatorNotifier> = Arc::new(SilentNotifier);
        let connection = ConnectionManager::new(
            transport.clone(),
            notifier.clone(),
            None,
            ConnectionSettings::default(),
        );
        let forwarder = Arc::new(ForwardingRouter::new(
            store.clone(),
            Arc::new(connection.clone()),
            RouterSettings::default(),
        ));
        let admin: Arc<dyn RuleAdmin> = store;
        (
            AppState {
                cfg: Arc::new(cfg),
                connection,
                forwarder,
                admin,
                notifier,
            },
            transport,
        )
    }

    #[test]
    fn parses_commands_addressed_to_the_bot() {
        assert_eq!(
            parse_command("/AddChannel@relay_bot @news  Daily News"),
            ("addchannel".to_string(), "@news  Daily News".to_string())
        );
        assert_eq!(id_and_rest("@news  Daily News"), Some(("@news", "Daily News")));
        assert_eq!(id_and_rest("@news"), None);
        assert_eq!(two_ids("@news 100"), Some(("@news", "100")));
    }

    #[test]
    fn long_replies_split_on_line_boundaries() {
        let text = (0..100).map(|i| format!("line {i:03}")).collect::<Vec<_>>().join("\n");
        let chunks = split_lines(&text, 100);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 100));
        assert_eq!(chunks.join("\n"), text);
    }

    #[tokio::test]
    async fn rule_management_round_trip() {
        let (st, _) = state().await;

        let reply = execute(&st, "addrule", "@news 100").await;
        assert!(reply.contains("channel @news"), "{reply}");

        assert!(execute(&st, "addchannel", "@news Daily <News>").await.contains("Daily &lt;News&gt;"));
        assert!(execute(&st, "addgroup", "100 Family").await.starts_with("✅"));
        assert!(execute(&st, "addrule", "@news 100").await.contains("Family"));

        let rules = execute(&st, "listrules", "").await;
        assert!(rules.contains("<code>@news</code>"));
        assert_eq!(st.forwarder.cached_rules().await.len(), 1);

        assert!(execute(&st, "removerule", "@news 100").await.starts_with("✅"));
        assert!(execute(&st, "listrules", "").await.starts_with("No forwarding rules"));
        assert!(st.forwarder.cached_rules().await.is_empty());
    }

    #[tokio::test]
    async fn usage_is_shown_for_missing_arguments() {
        let (st, _) = state().await;
        assert!(execute(&st, "addchannel", "").await.starts_with("Usage"));
        assert!(execute(&st, "addrule", "@news").await.starts_with("Usage"));
        assert!(execute(&st, "removegroup", "").await.starts_with("Usage"));
        assert!(execute(&st, "frobnicate", "").await.starts_with("Unknown"));
    }

    #[tokio::test]
    async fn stats_default_to_a_week() {
        let (st, _) = state().await;
        let reply = execute(&st, "stats", "").await;
        assert!(reply.contains("Last 7 day(s)"));
        assert!(reply.contains("Total: 0"));
        assert!(execute(&st, "cleanup", "").await.contains("older than 30 day(s)"));
    }

    #[tokio::test]
    async fn login_starts_initialization_in_the_background() {
        let (st, transport) = state().await;
        let reply = execute(&st, "login", "").await;
        assert!(reply.starts_with("🔄"));

        for _ in 0..100 {
            if transport.starts.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(transport.starts.load(Ordering::SeqCst), 1);
        assert!(execute(&st, "status", "").await.contains("WhatsApp: initializing"));
    }
}
