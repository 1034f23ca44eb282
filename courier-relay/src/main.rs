//! courier-relay binary entry point.
//!
//! Usage:
//! ```bash
//! courier-relay --config courier.toml
//! ```

use anyhow::Context;
use courier_relay::config::Config;
use courier_relay::http;
use courier_relay::protocol;
use courier_relay::server::CourierServer;
use courier_relay::storage::SqliteKeyStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        tracing::warn!("Config file {:?} not found, using defaults", config_path);
        Config::default()
    };

    tracing::info!("courier-relay v{}", env!("CARGO_PKG_VERSION"));

    let store = SqliteKeyStore::new(&config.directory.database)
        .await
        .with_context(|| format!("opening key database {:?}", config.directory.database))?;
    if !config.directory.enforce_signatures {
        tracing::warn!("Signed prekey signature enforcement is disabled");
    }

    let relay_listener = TcpListener::bind(&config.relay.bind_address)
        .await
        .with_context(|| format!("binding relay listener on {}", config.relay.bind_address))?;
    let http_listener = TcpListener::bind(&config.http.bind_address)
        .await
        .with_context(|| format!("binding HTTP listener on {}", config.http.bind_address))?;

    let server = Arc::new(CourierServer::new(config, Arc::new(store)));
    http::health::init_start_time();

    tracing::info!("Mailbox relay listening on {}", relay_listener.local_addr()?);
    tracing::info!("Key directory listening on {}", http_listener.local_addr()?);

    let app = http::build_router(server.clone());
    let http_server = axum::serve(
        http_listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        _ = protocol::serve(relay_listener, server) => {}
        result = http_server => result.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("courier.toml"))
}
