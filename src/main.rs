use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cache;
mod config;
mod gen;
mod http;
mod ingest;
mod messaging;
mod metrics;
mod models;
mod store;

use cache::OrderCache;
use config::Config;
use http::AppState;
use ingest::IngestPipeline;
use messaging::NatsClient;
use metrics::Metrics;
use store::{OrderStore, PgOrderStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging with environment-based filtering.
    // Override with e.g. RUST_LOG=debug.
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,orderstream=debug")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        nats_url = %config.nats_url,
        channel = %config.channel,
        http_port = config.http_port,
        "Starting orderstream"
    );

    // Store and bus are required to serve at all: failure here is fatal.
    let store = Arc::new(
        PgOrderStore::connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?,
    );
    let store: Arc<dyn OrderStore> = store;

    let metrics = Arc::new(Metrics::new()?);

    let cache = Arc::new(OrderCache::new());
    let loaded = cache
        .warm(store.as_ref())
        .await
        .context("failed to warm cache from store")?;
    metrics.set_cache_size(loaded);
    tracing::info!(orders = loaded, "Cache ready");

    let bus = Arc::new(
        NatsClient::connect(&config.nats_url, &config.client_id)
            .await
            .context("failed to connect to NATS")?,
    );

    let pipeline = Arc::new(IngestPipeline::new(
        cache.clone(),
        store.clone(),
        metrics.clone(),
    ));
    bus.subscribe(&config.channel, ingest::message_handler(pipeline))
        .await
        .context("failed to subscribe to order channel")?;

    if config.seed_messages > 0 {
        let seed_bus = bus.clone();
        let channel = config.channel.clone();
        let count = config.seed_messages;
        tokio::spawn(async move {
            match gen::generate_messages(count) {
                Ok(messages) => {
                    tracing::info!(count, "Seeding generated test orders");
                    for message in messages {
                        if let Err(err) = seed_bus.publish(&channel, message.into()).await {
                            tracing::warn!(error = %err, "Failed to publish seed message");
                        }
                    }
                }
                Err(err) => tracing::error!(error = %err, "Failed to generate seed messages"),
            }
        });
    }

    let state = Arc::new(AppState {
        cache,
        store,
        bus: bus.clone(),
        metrics,
        channel: config.channel.clone(),
    });
    http::run_server(state, config.http_port).await?;

    bus.close().await?;
    Ok(())
}
