use crate::{errors::Error, Result};

/// Initialize tracing for the relay.
///
/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL` (default `info`) applies to
/// the workspace crates and `warn` to everything else. `LOG_JSON=true` emits
/// one JSON object per line.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let level = level.trim().to_lowercase();
        EnvFilter::new(format!(
            "warn,tgwa={level},tgwa_core={level},tgwa_telegram={level},tgwa_whatsapp={level},tgwa_store_sqlite={level},{}={level}",
            service_name.replace('-', "_")
        ))
    });

    let json = std::env::var("LOG_JSON")
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);

    let installed = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(true)
            .try_init()
    };

    installed.map_err(|e| Error::Config(format!("failed to install log subscriber: {e}")))
}
