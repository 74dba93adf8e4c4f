//! Daemon wiring: config, watcher, engine, publisher, signals.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Cli;
use crate::aggregate::{Aggregator, EngineStats};
use crate::config::Settings;
use crate::publish::{LogPublisher, MqttPublisher, Publisher};
use crate::watcher::{FsWatcher, WatchRegistry};

/// Load settings from the CLI's config path and apply CLI overrides.
pub fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Error reading config {}", cli.config.display()))?;

    if let Some(window_secs) = cli.window_secs {
        settings.batching.window_secs = window_secs;
        settings.validate()?;
    }

    Ok(settings)
}

/// Run the daemon until SIGINT/SIGTERM.
///
/// Exits with an error if the watcher stops on its own. An unreachable
/// broker at startup only logs a warning.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(&cli)?;
    crate::logging::init_with_config(&settings.logging);

    let registry = Arc::new(WatchRegistry::load(&settings)?);
    crate::log_event!(
        "config",
        "loaded",
        "{} libraries, {} directories",
        registry.libraries().len(),
        registry.directories().len()
    );

    let stats = if cli.dry_run {
        crate::log_event!("config", "dry run, payloads are logged only");
        serve(&settings, registry, LogPublisher::new()).await?
    } else {
        let publisher = MqttPublisher::connect(&settings.mqtt)
            .await
            .context("Failed to connect to MQTT broker")?;
        serve(&settings, registry, publisher).await?
    };

    crate::log_event!(
        "shelfwatch",
        "exiting",
        "{} batches published",
        stats.batches_published
    );
    Ok(())
}

async fn serve<P>(
    settings: &Settings,
    registry: Arc<WatchRegistry>,
    publisher: P,
) -> anyhow::Result<EngineStats>
where
    P: Publisher + 'static,
{
    let (events_tx, events_rx) = mpsc::channel(settings.batching.channel_capacity.max(1));
    let cancel = CancellationToken::new();

    let watcher = FsWatcher::new(events_tx).context("Failed to create watcher")?;
    watcher.watch_registry(&registry).await?;

    let engine = Aggregator::from_config(
        registry,
        publisher,
        &settings.batching,
        &settings.publish,
    );
    let engine_task = tokio::spawn(engine.run(events_rx, cancel.clone()));
    let watcher_task = tokio::spawn(watcher.run(cancel.clone()));

    supervise(engine_task, watcher_task, cancel, shutdown_signal()).await
}

/// Wait for `shutdown` or for the engine to stop on its own.
///
/// The engine only stops unprompted when the watcher's event stream ends.
/// Its open batch has been flushed by then, but the daemon is no longer
/// watching anything, so that path is an error.
async fn supervise(
    mut engine_task: JoinHandle<EngineStats>,
    watcher_task: JoinHandle<()>,
    cancel: CancellationToken,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<EngineStats> {
    tokio::select! {
        _ = shutdown => {
            crate::log_event!("shelfwatch", "shutdown requested");
            cancel.cancel();
            let stats = engine_task.await.context("Engine task failed")?;
            watcher_task.await.context("Watcher task failed")?;
            Ok(stats)
        }
        joined = &mut engine_task => {
            cancel.cancel();
            let stats = joined.context("Engine task failed")?;
            watcher_task.await.context("Watcher task failed")?;
            tracing::error!(
                "[shelfwatch] engine stopped without a shutdown request after {} events",
                stats.events_seen
            );
            Err(anyhow!("watcher stopped unexpectedly"))
        }
    }
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[signal] failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("[signal] failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
