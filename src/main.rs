use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use promo_relay::audit::StoreAudit;
use promo_relay::broadcast::Broadcaster;
use promo_relay::cache::{ConfigCache, spawn_refresh_task};
use promo_relay::channels::{SourceChannel, TelegramDelivery, TelegramListener};
use promo_relay::config::{DedupMode, RelayConfig};
use promo_relay::dedup::{self, DedupGate, MemoryDedupGate, StoreDedupGate};
use promo_relay::ingest::spawn_producer;
use promo_relay::pipeline::Relay;
use promo_relay::store::LibSqlBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().context("Invalid relay configuration")?;

    // Initialize tracing; keep the guard alive so the file writer flushes.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "promo-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %config.db_path.display(),
        dedup = ?config.dedup_mode,
        listeners = config.listener_tokens.len(),
        "Promo relay starting"
    );

    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .context("Failed to open database")?,
    );

    let cache = ConfigCache::load(db.clone(), config.cache.clone())
        .await
        .context("Initial configuration load failed")?;
    let refresh_handle = spawn_refresh_task(Arc::clone(&cache));

    let gate: Arc<dyn DedupGate> = match config.dedup_mode {
        DedupMode::Store => Arc::new(StoreDedupGate::new(db.clone(), config.code_ttl)),
        DedupMode::Memory => Arc::new(MemoryDedupGate::new(config.code_ttl)),
    };
    let sweep_handle = dedup::spawn_sweep_task(Arc::clone(&gate), config.sweep_interval);

    let delivery = Arc::new(TelegramDelivery::new(config.bot_token.clone()));
    if let Err(e) = delivery.health_check().await {
        tracing::warn!(error = %e, "Delivery bot health check failed");
    }

    let broadcaster = Broadcaster::new(delivery, config.max_concurrent_sends)
        .with_audit(Arc::new(StoreAudit::new(db.clone())));
    let relay = Arc::new(Relay::new(cache, gate, broadcaster));

    let mut producers = Vec::with_capacity(config.listener_tokens.len());
    for (i, token) in config.listener_tokens.iter().enumerate() {
        let listener = Arc::new(TelegramListener::new(
            format!("telegram-{}", i + 1),
            token.clone(),
        ));
        if let Err(e) = listener.health_check().await {
            tracing::warn!(listener = listener.name(), error = %e, "Listener health check failed");
        }
        producers.push(spawn_producer(listener, Arc::clone(&relay)));
    }

    tracing::info!(producers = producers.len(), "Relay running; Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    // Producers own their in-flight handlers; drain before aborting them.
    relay.shutdown(config.shutdown_grace).await;
    for producer in &producers {
        producer.abort();
    }
    refresh_handle.abort();
    sweep_handle.abort();

    tracing::info!("Promo relay stopped");
    Ok(())
}
