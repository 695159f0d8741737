use anyhow::Context;
use kraken_relay::core::config::{Credential, GatewayConfig};
use kraken_relay::exchanges::kraken::build_rest_client;
use kraken_relay::exchanges::kraken::KrakenRest;
use kraken_relay::gateway::{self, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "env-file")]
fn load_credential() -> Result<Credential, kraken_relay::core::config::ConfigError> {
    Credential::from_env_file("KRAKEN")
}

#[cfg(not(feature = "env-file"))]
fn load_credential() -> Result<Credential, kraken_relay::core::config::ConfigError> {
    Credential::from_env("KRAKEN")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;

    let credential = match load_credential() {
        Ok(credential) => Some(Arc::new(credential)),
        Err(e) => {
            warn!(error = %e, "No Kraken credentials, private endpoints will fail");
            None
        }
    };

    // Fail fast on an unreachable exchange or a rejected key
    let kraken = KrakenRest::new(build_rest_client(
        config.rest_base_url.clone(),
        credential.clone(),
    )?);
    let time = kraken
        .get_server_time()
        .await
        .context("Kraken is unreachable")?;
    info!(server_time = %time.rfc1123, "Kraken reachable");
    if credential.is_some() {
        let balances = kraken
            .get_balance()
            .await
            .context("Kraken rejected the configured credentials")?;
        info!(assets = balances.len(), "Credentials verified");
    }

    let state = AppState::from_config(&config, credential)?;
    let app = gateway::router(state, config.development);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    gateway::serve(listener, app, shutdown_signal()).await?;

    Ok(())
}
