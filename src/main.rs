use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;

use tracing::info;

use stream_relay::{
    AppConfig, DynUpstreamService, Logger, SessionManager, UpstreamService, get_app_version,
};

// standalone entry: one relay session for the configured stream, torn down on
// ctrl-c. inside the player shell the SessionManager is driven directly.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards are kept alive to flush logs and maintain the sentry connection
    let _guards = Logger::init(config.cargo_env, config.sentry_dsn.clone());

    info!("stream-relay {} starting...", get_app_version());

    let upstream = Arc::new(UpstreamService::new(
        Duration::from_secs(config.upstream_timeout_secs),
        config.max_redirects,
    )) as DynUpstreamService;

    let sessions = SessionManager::new(upstream);

    let base_url = sessions
        .start_session(&config.stream_url, config.stream_kind)
        .await
        .context("relay session failed to start")?;

    info!("relay ready, point the player at {}", base_url);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down...");
    sessions.stop_session().await;

    Ok(())
}
