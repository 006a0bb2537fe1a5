//! SQLite-backed rule store: channels, destination groups, forwarding rules,
//! delivery history and key/value settings.
//!
//! All access goes through one `tokio_rusqlite::Connection`, which serializes
//! closures on its own background thread.

mod migrations;

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use tgwa_core::{
    domain::{
        Channel, ChannelId, DeliveryRecord, DeliveryStats, DestinationGroup, ForwardingRule,
        GroupId,
    },
    ports::{RuleAdmin, RuleStore, SettingsStore},
    Error, Result,
};

type DbError = tokio_rusqlite::Error<rusqlite::Error>;

/// Matches SQLite's `strftime('%Y-%m-%dT%H:%M:%fZ')` so text comparison orders correctly.
fn sql_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Start of a `days`-long window ending now; windows beyond chrono's range cover everything.
fn cutoff(days: u32) -> String {
    let since = ChronoDuration::try_days(i64::from(days))
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    sql_timestamp(since)
}

fn persistence(op: &'static str) -> impl Fn(DbError) -> Error {
    move |e| Error::Persistence(format!("failed to {op}: {e}"))
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: ChannelId(row.get(0)?),
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        active: row.get(2)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<DestinationGroup> {
    Ok(DestinationGroup {
        id: GroupId(row.get(0)?),
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        active: row.get(2)?,
    })
}

const RULES_QUERY: &str = "SELECT c.telegram_channel_id, c.telegram_channel_name, c.is_active, \
            wg.group_id, wg.group_name, wg.is_active, fr.is_active \
     FROM forwarding_rules fr \
     JOIN channels c ON fr.channel_id = c.id \
     JOIN whatsapp_groups wg ON fr.whatsapp_group_id = wg.id \
     WHERE fr.is_active = 1 AND c.is_active = 1 AND wg.is_active = 1 \
     ORDER BY fr.created_at DESC, fr.id DESC";

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<ForwardingRule> {
    Ok(ForwardingRule {
        channel: Channel {
            id: ChannelId(row.get(0)?),
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            active: row.get(2)?,
        },
        destination: DestinationGroup {
            id: GroupId(row.get(3)?),
            name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            active: row.get(5)?,
        },
        active: row.get(6)?,
    })
}

enum RuleLink {
    Linked(ForwardingRule),
    UnknownChannel,
    UnknownGroup,
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(path)
            .await
            .map_err(|e| Error::Persistence(format!("failed to open {}: {e}", path.display())))?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Persistence(format!("failed to open in-memory db: {e}")))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        let applied = conn
            .call(|conn| {
                conn.pragma_update(None, "foreign_keys", "ON")?;
                migrations::run(conn)
            })
            .await
            .map_err(persistence("run migrations"))?;
        tracing::info!(applied, version = migrations::latest_version(), "database schema ready");
        Ok(Self {
            conn: Arc::new(conn),
        })
    }
}

#[async_trait]
impl RuleAdmin for SqliteStore {
    /// Register a channel, or rename and re-activate it if already known.
    async fn add_channel(&self, external_id: &str, name: &str) -> Result<Channel> {
        let id = external_id.to_string();
        let name = name.to_string();
        let channel = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO channels (telegram_channel_id, telegram_channel_name) \
                     VALUES (?1, ?2) \
                     ON CONFLICT(telegram_channel_id) \
                     DO UPDATE SET telegram_channel_name = excluded.telegram_channel_name, \
                                   is_active = 1",
                    params![id, name],
                )?;
                conn.query_row(
                    "SELECT telegram_channel_id, telegram_channel_name, is_active \
                     FROM channels WHERE telegram_channel_id = ?1",
                    params![id],
                    channel_from_row,
                )
            })
            .await
            .map_err(persistence("add channel"))?;
        tracing::info!(channel = %channel.id, name = %channel.name, "channel added/updated");
        Ok(channel)
    }

    /// Register a destination group, or rename and re-activate it if already known.
    async fn add_group(&self, external_id: &str, name: &str) -> Result<DestinationGroup> {
        let id = external_id.to_string();
        let name = name.to_string();
        let group = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO whatsapp_groups (group_id, group_name) \
                     VALUES (?1, ?2) \
                     ON CONFLICT(group_id) \
                     DO UPDATE SET group_name = excluded.group_name, is_active = 1",
                    params![id, name],
                )?;
                conn.query_row(
                    "SELECT group_id, group_name, is_active \
                     FROM whatsapp_groups WHERE group_id = ?1",
                    params![id],
                    group_from_row,
                )
            })
            .await
            .map_err(persistence("add group"))?;
        tracing::info!(destination = %group.id, name = %group.name, "group added/updated");
        Ok(group)
    }

    /// Link an active channel to an active group. Both must already be registered.
    async fn add_rule(&self, channel_id: &str, group_id: &str) -> Result<ForwardingRule> {
        let ch = channel_id.to_string();
        let grp = group_id.to_string();
        let link = self
            .conn
            .call(move |conn| {
                let channel = conn
                    .query_row(
                        "SELECT id, telegram_channel_id, telegram_channel_name, is_active \
                         FROM channels WHERE telegram_channel_id = ?1 AND is_active = 1",
                        params![ch],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                Channel {
                                    id: ChannelId(row.get(1)?),
                                    name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                                    active: row.get(3)?,
                                },
                            ))
                        },
                    )
                    .optional()?;
                let Some((channel_row, channel)) = channel else {
                    return Ok(RuleLink::UnknownChannel);
                };

                let group = conn
                    .query_row(
                        "SELECT id, group_id, group_name, is_active \
                         FROM whatsapp_groups WHERE group_id = ?1 AND is_active = 1",
                        params![grp],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                DestinationGroup {
                                    id: GroupId(row.get(1)?),
                                    name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                                    active: row.get(3)?,
                                },
                            ))
                        },
                    )
                    .optional()?;
                let Some((group_row, destination)) = group else {
                    return Ok(RuleLink::UnknownGroup);
                };

                conn.execute(
                    "INSERT INTO forwarding_rules (channel_id, whatsapp_group_id) \
                     VALUES (?1, ?2) \
                     ON CONFLICT(channel_id, whatsapp_group_id) DO UPDATE SET is_active = 1",
                    params![channel_row, group_row],
                )?;
                Ok::<_, rusqlite::Error>(RuleLink::Linked(ForwardingRule {
                    channel,
                    destination,
                    active: true,
                }))
            })
            .await
            .map_err(persistence("add forwarding rule"))?;

        match link {
            RuleLink::Linked(rule) => {
                tracing::info!(
                    channel = %rule.channel.id,
                    destination = %rule.destination.id,
                    "forwarding rule added"
                );
                Ok(rule)
            }
            RuleLink::UnknownChannel => Err(Error::Persistence(format!(
                "channel {channel_id} is not registered or inactive"
            ))),
            RuleLink::UnknownGroup => Err(Error::Persistence(format!(
                "group {group_id} is not registered or inactive"
            ))),
        }
    }

    /// Returns false if no such channel exists.
    async fn deactivate_channel(&self, external_id: &str) -> Result<bool> {
        let id = external_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE channels SET is_active = 0 WHERE telegram_channel_id = ?1",
                    params![id],
                )
            })
            .await
            .map_err(persistence("deactivate channel"))?;
        tracing::info!(channel = external_id, changed, "channel deactivated");
        Ok(changed > 0)
    }

    async fn deactivate_group(&self, external_id: &str) -> Result<bool> {
        let id = external_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE whatsapp_groups SET is_active = 0 WHERE group_id = ?1",
                    params![id],
                )
            })
            .await
            .map_err(persistence("deactivate group"))?;
        tracing::info!(destination = external_id, changed, "group deactivated");
        Ok(changed > 0)
    }

    async fn deactivate_rule(&self, channel_id: &str, group_id: &str) -> Result<bool> {
        let ch = channel_id.to_string();
        let grp = group_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE forwarding_rules SET is_active = 0 \
                     WHERE channel_id = (SELECT id FROM channels WHERE telegram_channel_id = ?1) \
                       AND whatsapp_group_id = (SELECT id FROM whatsapp_groups WHERE group_id = ?2)",
                    params![ch, grp],
                )
            })
            .await
            .map_err(persistence("deactivate forwarding rule"))?;
        tracing::info!(channel = channel_id, destination = group_id, changed, "forwarding rule deactivated");
        Ok(changed > 0)
    }

    /// Delivery counts over the last `days` days.
    async fn message_stats(&self, days: u32) -> Result<DeliveryStats> {
        let since = cutoff(days);
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*), \
                            COALESCE(SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END), 0), \
                            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) \
                     FROM message_history WHERE forwarded_at >= ?1",
                    params![since],
                    |row| {
                        let count = |i: usize| -> rusqlite::Result<u64> {
                            Ok(u64::try_from(row.get::<_, i64>(i)?).unwrap_or(0))
                        };
                        Ok(DeliveryStats {
                            total: count(0)?,
                            sent: count(1)?,
                            failed: count(2)?,
                        })
                    },
                )
            })
            .await
            .map_err(persistence("read message stats"))
    }

    /// Drop delivery history older than `days` days. Returns the number of rows removed.
    async fn clean_old_deliveries(&self, days: u32) -> Result<usize> {
        let before = cutoff(days);
        let removed = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM message_history WHERE forwarded_at < ?1",
                    params![before],
                )
            })
            .await
            .map_err(persistence("clean delivery history"))?;
        tracing::info!(removed, days, "old delivery history cleaned");
        Ok(removed)
    }
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn list_active_channels(&self) -> Result<Vec<Channel>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT telegram_channel_id, telegram_channel_name, is_active \
                     FROM channels WHERE is_active = 1 \
                     ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt
                    .query_map([], channel_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await
            .map_err(persistence("list channels"))
    }

    async fn list_active_destinations(&self) -> Result<Vec<DestinationGroup>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT group_id, group_name, is_active \
                     FROM whatsapp_groups WHERE is_active = 1 \
                     ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt
                    .query_map([], group_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await
            .map_err(persistence("list groups"))
    }

    async fn list_active_rules(&self) -> Result<Vec<ForwardingRule>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(RULES_QUERY)?;
                let rows = stmt
                    .query_map([], rule_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await
            .map_err(persistence("list forwarding rules"))
    }

    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        let post_id = record.post_id.0.clone();
        let channel_id = record.channel_id.0.clone();
        let destination = record.destination_id.clone();
        let content = record.content.clone();
        let status = record.status.as_str();
        let error = record.error.clone();
        let at = sql_timestamp(record.timestamp);

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO message_history \
                     (telegram_message_id, telegram_channel_id, whatsapp_group_id, \
                      message_content, forwarded_at, status, error) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![post_id, channel_id, destination, content, at, status, error],
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(persistence("record delivery"))
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT setting_value FROM bot_settings WHERE setting_key = ?1",
                    params![key],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
            })
            .await
            .map_err(persistence("read setting"))?;
        Ok(value.flatten().filter(|v| !v.is_empty()))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let k = key.to_string();
        let v = value.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO bot_settings (setting_key, setting_value) VALUES (?1, ?2) \
                     ON CONFLICT(setting_key) DO UPDATE SET \
                        setting_value = excluded.setting_value, \
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                    params![k, v],
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(persistence("write setting"))?;
        // Values can be large session snapshots; log the size only.
        tracing::info!(key, bytes = value.len(), "setting updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgwa_core::domain::{DeliveryStatus, PostId};

    async fn store() -> SqliteStore {
        SqliteStore::open_in_memory().await.unwrap()
    }

    fn record(dest: &str, status: DeliveryStatus, at: DateTime<Utc>) -> DeliveryRecord {
        DeliveryRecord {
            post_id: PostId("1".into()),
            channel_id: ChannelId("5551".into()),
            destination_id: dest.to_string(),
            content: "hello".to_string(),
            status,
            error: (status == DeliveryStatus::Failed).then(|| "boom".to_string()),
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn rules_join_both_sides_newest_first() {
        let s = store().await;
        s.add_channel("@news", "News").await.unwrap();
        s.add_group("100", "Family").await.unwrap();
        s.add_group("200@g.us", "Work").await.unwrap();
        s.add_rule("@news", "100").await.unwrap();
        s.add_rule("@news", "200@g.us").await.unwrap();

        let rules = s.list_active_rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].destination.id, GroupId("200@g.us".into()));
        assert_eq!(rules[1].destination.name, "Family");
        assert_eq!(rules[1].channel.name, "News");
    }

    #[tokio::test]
    async fn rule_requires_registered_sides() {
        let s = store().await;
        s.add_channel("@news", "News").await.unwrap();

        let err = s.add_rule("@news", "404").await.unwrap_err();
        assert!(matches!(err, Error::Persistence(m) if m.contains("group 404")));
        let err = s.add_rule("@nope", "404").await.unwrap_err();
        assert!(matches!(err, Error::Persistence(m) if m.contains("channel @nope")));
    }

    #[tokio::test]
    async fn deactivation_hides_rules_and_re_adding_revives_them() {
        let s = store().await;
        s.add_channel("@news", "News").await.unwrap();
        s.add_group("100", "Family").await.unwrap();
        s.add_rule("@news", "100").await.unwrap();

        assert!(s.deactivate_group("100").await.unwrap());
        assert!(s.list_active_rules().await.unwrap().is_empty());
        assert!(s.list_active_destinations().await.unwrap().is_empty());

        s.add_group("100", "Family v2").await.unwrap();
        let rules = s.list_active_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].destination.name, "Family v2");

        assert!(s.deactivate_rule("@news", "100").await.unwrap());
        assert!(s.list_active_rules().await.unwrap().is_empty());
        assert!(!s.deactivate_rule("@news", "999").await.unwrap());

        assert!(s.deactivate_channel("@news").await.unwrap());
        assert!(s.list_active_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_and_cleanup_respect_the_window() {
        let s = store().await;
        let now = Utc::now();
        s.record_delivery(&record("1@g.us", DeliveryStatus::Sent, now))
            .await
            .unwrap();
        s.record_delivery(&record("2@g.us", DeliveryStatus::Failed, now))
            .await
            .unwrap();
        s.record_delivery(&record(
            "1@g.us",
            DeliveryStatus::Sent,
            now - ChronoDuration::days(40),
        ))
        .await
        .unwrap();

        let week = s.message_stats(7).await.unwrap();
        assert_eq!(
            week,
            DeliveryStats {
                total: 2,
                sent: 1,
                failed: 1
            }
        );
        assert_eq!(s.message_stats(60).await.unwrap().total, 3);

        assert_eq!(s.clean_old_deliveries(30).await.unwrap(), 1);
        assert_eq!(s.message_stats(60).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn huge_windows_cover_all_history() {
        let s = store().await;
        s.record_delivery(&record(
            "1@g.us",
            DeliveryStatus::Sent,
            Utc::now() - ChronoDuration::days(400),
        ))
        .await
        .unwrap();

        assert_eq!(s.message_stats(u32::MAX).await.unwrap().total, 1);
        assert_eq!(s.message_stats(4_000_000_000).await.unwrap().sent, 1);
        assert_eq!(s.clean_old_deliveries(u32::MAX).await.unwrap(), 0);
        assert_eq!(s.message_stats(u32::MAX).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn settings_upsert() {
        let s = store().await;
        assert_eq!(s.get_setting("whatsapp_session").await.unwrap(), None);
        s.set_setting("whatsapp_session", "abc").await.unwrap();
        s.set_setting("whatsapp_session", "def").await.unwrap();
        assert_eq!(
            s.get_setting("whatsapp_session").await.unwrap(),
            Some("def".to_string())
        );
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/relay.db");
        {
            let s = SqliteStore::open(&path).await.unwrap();
            s.add_channel("-1001", "Alerts").await.unwrap();
        }
        let s = SqliteStore::open(&path).await.unwrap();
        let channels = s.list_active_channels().await.unwrap();
        assert_eq!(channels[0].id, ChannelId("-1001".into()));
    }
}
