// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tributary serve` command implementation.
//!
//! Opens the store and broker, declares queues, then runs the aggregator
//! workers and the scheduler loops enabled in configuration until SIGINT or
//! SIGTERM. Workers stop taking new messages on shutdown and in-flight
//! handlers are drained within `service.drain_timeout_secs`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tributary_aggregator::Aggregator;
use tributary_config::TributaryConfig;
use tributary_core::TributaryError;
use tributary_scheduler::Scheduler;

use crate::services::Services;
use crate::shutdown;

/// Slack on top of the per-worker drain timeout for joining every task.
const JOIN_GRACE: Duration = Duration::from_secs(2);

/// Runs the `tributary serve` command.
pub async fn run_serve(config: TributaryConfig) -> Result<(), TributaryError> {
    init_tracing(&config.service.log_level);
    info!(name = %config.service.name, "starting tributary serve");

    let services = Services::open(config).await?;
    services.bootstrap(false).await?;

    let cancel = shutdown::install_signal_handler();
    run_until_cancelled(&services, cancel).await?;

    services.close().await;
    info!("tributary serve shutdown complete");
    Ok(())
}

/// Start the enabled workers, wait for `cancel`, then drain them.
pub async fn run_until_cancelled(services: &Services, cancel: CancellationToken) -> Result<(), TributaryError> {
    let config = &services.config;

    let mut workers = Vec::new();
    if config.aggregator.enabled {
        let aggregator = Aggregator::from_config(services.ctx.clone(), services.feed_indexer(), &config.aggregator);
        workers = aggregator.start(cancel.clone()).await?;
        info!(workers = workers.len(), "aggregator started");
    } else {
        info!("aggregator disabled by configuration");
    }

    let scheduler = if config.scheduler.enabled {
        let handle = Scheduler::from_config(services.store.clone(), services.dispatch.clone(), &config.scheduler)
            .with_event_bus(services.events.clone())
            .start(cancel.clone())
            .await?;
        info!("scheduler started");
        Some(handle)
    } else {
        info!("scheduler disabled by configuration");
        None
    };

    if workers.is_empty() && scheduler.is_none() {
        warn!("nothing enabled, waiting for shutdown");
    }

    cancel.cancelled().await;
    info!("shutdown requested, draining workers");

    let stopped = async {
        for worker in workers {
            worker.join().await;
        }
        if let Some(scheduler) = scheduler {
            scheduler.join().await;
        }
    };
    let timeout = Duration::from_secs(config.service.drain_timeout_secs) + JOIN_GRACE;
    shutdown::drain(stopped, timeout).await;
    Ok(())
}

/// Initializes the tracing subscriber with the given log level.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tributary={log_level},warn")));

    // A second init (tests, repeated subcommands) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_config::load_config_from_str;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serve_stops_on_cancel() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("serve.db");
        let toml = format!(
            "[storage]\ndatabase_path = {:?}\n\n[service]\ndrain_timeout_secs = 1\n",
            path.to_string_lossy()
        );
        let services = Services::open(load_config_from_str(&toml).unwrap()).await.unwrap();
        services.bootstrap(false).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        tokio::time::timeout(Duration::from_secs(10), run_until_cancelled(&services, cancel))
            .await
            .unwrap()
            .unwrap();
        services.close().await;
    }
}
