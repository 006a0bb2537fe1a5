//! Liveness endpoint for container orchestrators.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use tgwa_core::{connection::ConnectionManager, utils::iso_timestamp_utc};

pub const SERVICE_NAME: &str = "telegram-whatsapp-relay";

async fn get_health(State(connection): State<ConnectionManager>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "timestamp": iso_timestamp_utc(),
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "whatsapp": connection.state().as_str(),
    }))
}

pub fn app(connection: ConnectionManager) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .with_state(connection)
}

/// Serve `/health` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    connection: ConnectionManager,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "health endpoint listening");
    }
    axum::serve(listener, app(connection))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
