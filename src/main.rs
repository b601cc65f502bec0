use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use channel_relay::bus::AmqpPublisher;
use channel_relay::config::{RelayConfig, StoreConfig};
use channel_relay::feed::{FeedClient, HttpFeedClient, SourceReader};
use channel_relay::poller::{IdentityCache, PollConfig, PollCycle, Scheduler, warm_cache};
use channel_relay::store::{ItemStore, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    let config = RelayConfig::from_env().context("failed to load configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📡 Channel Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Channel: {}", config.channel);
    eprintln!("   Schedule: {}", config.schedule);
    eprintln!("   Destination: {} ({})", config.exchange, config.routing_key);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn ItemStore> = match &config.store {
        StoreConfig::Local { path } => {
            eprintln!("   Database: {}", path.display());
            Arc::new(
                LibSqlBackend::new_local(path)
                    .await
                    .with_context(|| format!("failed to open database at {}", path.display()))?,
            )
        }
        StoreConfig::Remote { url, auth_token } => {
            eprintln!("   Database: {url}");
            Arc::new(
                LibSqlBackend::new_remote(url, auth_token)
                    .await
                    .with_context(|| format!("failed to connect to database at {url}"))?,
            )
        }
    };

    // ── Feed ─────────────────────────────────────────────────────────────
    let feed = Arc::new(HttpFeedClient::new(config.feed.clone())?);
    feed.health_check(&config.channel)
        .await
        .with_context(|| format!("feed '{}' is not reachable", config.channel))?;

    // ── Warm-up ──────────────────────────────────────────────────────────
    let mut cache = IdentityCache::new();
    let report = warm_cache(store.as_ref(), &config.channel, &config.warmup, &mut cache)
        .await
        .context("failed to warm the identity cache")?;
    eprintln!("   Warm-up: {} ids ({:?})", report.seeded, report.source);

    // ── Message bus ──────────────────────────────────────────────────────
    let publisher = Arc::new(
        AmqpPublisher::connect(config.amqp.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to connect to AMQP broker at {}:{}",
                    config.amqp.host, config.amqp.port
                )
            })?,
    );

    // ── Poller ───────────────────────────────────────────────────────────
    let reader = SourceReader::new(feed, config.channel.clone(), config.call_timeout)
        .with_max_scan(config.max_scan);
    let cycle = PollCycle::new(
        reader,
        store,
        publisher.clone(),
        cache,
        PollConfig {
            destination: config.exchange.clone(),
            routing_key: config.routing_key.clone(),
            record_policy: config.record_policy,
            call_timeout: config.call_timeout,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    eprintln!("   Press Ctrl-C to stop.\n");
    let outcome = Scheduler::new(config.schedule.clone(), cycle)
        .run(shutdown_rx)
        .await;

    publisher.close().await;
    let summary = outcome.context("scheduler stopped")?;
    tracing::info!(ticks = summary.ticks, failed = summary.failed, "Channel relay stopped");
    Ok(())
}

/// Log to stderr, plus a daily-rolling file when `log_dir` is set.
///
/// The returned guard flushes the file writer on drop and must live until
/// the process exits.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "channel-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("Failed to install SIGTERM handler: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        // Without a signal source the relay runs until killed.
        std::future::pending::<()>().await;
    }
}
