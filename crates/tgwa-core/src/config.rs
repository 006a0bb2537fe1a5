use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    connection::{ConnectionSettings, RetryPolicy},
    errors::Error,
    forwarding::RouterSettings,
    messaging::throttled::ThrottleConfig,
    Result,
};

/// The WhatsApp gateway sidecar listens on 3000 by default.
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Typed relay configuration, read from the environment (plus an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_admin_ids: Vec<i64>,

    // Storage
    pub database_path: PathBuf,
    pub history_retention_days: u32,

    // WhatsApp gateway
    pub whatsapp_gateway_url: String,
    pub whatsapp_session_name: String,
    pub whatsapp_auth_dir: PathBuf,
    pub whatsapp_session_data: Option<String>,
    pub group_suffix: String,

    // Lifecycle
    pub init_timeout: Duration,
    pub retry_delay: Duration,
    pub max_init_retries: u32,
    pub max_reconnect_attempts: Option<u32>,

    // Delivery
    pub delivery_timeout: Option<Duration>,
    pub send_min_interval: Duration,

    // Health endpoint; `None` disables it.
    pub health_port: Option<u16>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_or = |key: &str, default: &str| {
            get(key)
                .and_then(non_empty)
                .unwrap_or_else(|| default.to_string())
        };
        let parsed = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());

        // Required env vars
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let telegram_admin_ids = parse_csv_i64(get("TELEGRAM_ADMIN_IDS"));

        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if telegram_admin_ids.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_ADMIN_IDS environment variable is required".to_string(),
            ));
        }

        let database_path = PathBuf::from(str_or("DATABASE_PATH", "data/relay.db"));
        let history_retention_days = parsed("HISTORY_RETENTION_DAYS")
            .and_then(|d| u32::try_from(d).ok())
            .filter(|d| *d > 0)
            .unwrap_or(30);

        let whatsapp_gateway_url = str_or("WHATSAPP_GATEWAY_URL", "http://127.0.0.1:3000")
            .trim_end_matches('/')
            .to_string();
        let whatsapp_session_name = str_or("WHATSAPP_SESSION_NAME", "whatsapp-bot");
        let whatsapp_auth_dir = PathBuf::from(str_or("WHATSAPP_AUTH_DIR", ".wwebjs_auth"));
        let whatsapp_session_data = get("WHATSAPP_SESSION_DATA").and_then(non_empty);
        let group_suffix = str_or("WHATSAPP_GROUP_SUFFIX", "@g.us");

        let init_timeout = Duration::from_millis(parsed("INIT_TIMEOUT_MS").unwrap_or(120_000));
        let retry_delay = Duration::from_millis(parsed("RETRY_DELAY_MS").unwrap_or(5_000));
        let max_init_retries = parsed("MAX_INIT_RETRIES")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(3);
        let max_reconnect_attempts =
            parsed("MAX_RECONNECT_ATTEMPTS").and_then(|n| u32::try_from(n).ok());

        // 0 disables the per-delivery timeout.
        let delivery_timeout = match parsed("DELIVERY_TIMEOUT_MS").unwrap_or(60_000) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let send_min_interval =
            Duration::from_millis(parsed("SEND_MIN_INTERVAL_MS").unwrap_or(1_000));

        let health_port = match get("HEALTH_PORT").or_else(|| get("PORT")) {
            None => Some(DEFAULT_HEALTH_PORT),
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(0) => None,
                Ok(p) => Some(p),
                Err(_) => {
                    return Err(Error::Config(format!("invalid HEALTH_PORT: {raw}")));
                }
            },
        };

        Ok(Self {
            telegram_bot_token,
            telegram_admin_ids,
            database_path,
            history_retention_days,
            whatsapp_gateway_url,
            whatsapp_session_name,
            whatsapp_auth_dir,
            whatsapp_session_data,
            group_suffix,
            init_timeout,
            retry_delay,
            max_init_retries,
            max_reconnect_attempts,
            delivery_timeout,
            send_min_interval,
            health_port,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_delay: self.retry_delay,
            max_init_retries: self.max_init_retries,
            max_reconnects: self.max_reconnect_attempts,
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            init_timeout: self.init_timeout,
            retry: self.retry_policy(),
        }
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            per_destination_min_interval: self.send_min_interval,
            ..ThrottleConfig::default()
        }
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            group_suffix: self.group_suffix.clone(),
            delivery_timeout: self.delivery_timeout,
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("TELEGRAM_ADMIN_IDS", "42, 7"),
    ];

    #[test]
    fn defaults_apply_when_only_required_keys_are_set() {
        let cfg = load(&REQUIRED).unwrap();
        assert_eq!(cfg.telegram_admin_ids, vec![42, 7]);
        assert_eq!(cfg.database_path, PathBuf::from("data/relay.db"));
        assert_eq!(cfg.group_suffix, "@g.us");
        assert_eq!(cfg.whatsapp_session_name, "whatsapp-bot");
        assert_eq!(cfg.init_timeout, Duration::from_secs(120));
        assert_eq!(cfg.delivery_timeout, Some(Duration::from_secs(60)));
        assert_eq!(cfg.health_port, Some(8080));
        // The local gateway sidecar owns :3000.
        assert!(!cfg
            .whatsapp_gateway_url
            .ends_with(&format!(":{DEFAULT_HEALTH_PORT}")));
        assert_eq!(cfg.max_reconnect_attempts, None);

        let policy = cfg.retry_policy();
        assert_eq!(policy.retry_delay, Duration::from_secs(5));
        assert_eq!(policy.max_init_retries, 3);
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let err = load(&[("TELEGRAM_ADMIN_IDS", "1")]).unwrap_err();
        assert!(matches!(err, Error::Config(m) if m.contains("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn missing_admins_is_a_config_error() {
        let err = load(&[("TELEGRAM_BOT_TOKEN", "t"), ("TELEGRAM_ADMIN_IDS", "x,")]).unwrap_err();
        assert!(matches!(err, Error::Config(m) if m.contains("TELEGRAM_ADMIN_IDS")));
    }

    #[test]
    fn zero_disables_timeout_and_health_port() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("DELIVERY_TIMEOUT_MS", "0"));
        pairs.push(("PORT", "0"));
        pairs.push(("MAX_RECONNECT_ATTEMPTS", "10"));
        pairs.push(("WHATSAPP_GATEWAY_URL", "http://gw:8080/"));
        let cfg = load(&pairs).unwrap();

        assert_eq!(cfg.delivery_timeout, None);
        assert_eq!(cfg.health_port, None);
        assert_eq!(cfg.connection_settings().retry.max_reconnects, Some(10));
        assert_eq!(cfg.whatsapp_gateway_url, "http://gw:8080");
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("HEALTH_PORT", "http"));
        assert!(matches!(load(&pairs), Err(Error::Config(_))));
    }
}
