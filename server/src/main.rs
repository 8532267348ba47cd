use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use protocol::GrantSigner;
use server::app::{self, PartyStore};
use server::broker::RedisBroker;
use server::config::Config;
use server::gateway::{self, GatewayState};
use server::session::HeaderSessions;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=info,protocol=info".parse().expect("valid filter")),
        )
        .init();

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.prometheus_port))
        .install()
        .context("failed to install metrics exporter")?;

    let broker = Arc::new(
        RedisBroker::connect(&config.redis_url)
            .await
            .context("failed to connect to redis broker")?,
    );
    let store = Arc::new(PartyStore::default());
    let router = Arc::new(app::build_router(broker, store).context("router build failed")?);
    let signer = Arc::new(GrantSigner::new(
        &config.app_key,
        &config.app_secret,
        config.grant_ttl_secs,
    ));

    let state = GatewayState {
        router,
        signer,
        sessions: Arc::new(HeaderSessions),
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "prpc gateway listening");

    axum::serve(listener, gateway::routes(state)).await?;
    Ok(())
}
