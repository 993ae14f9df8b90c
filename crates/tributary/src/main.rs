// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tributary - a news aggregation service.
//!
//! This is the binary entry point: the long-running `serve` command plus
//! one-shot administration commands against the same store and broker.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod commands;
mod serve;
mod services;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tributary_config::TributaryConfig;
use tributary_core::TributaryError;

use crate::services::Services;

/// Tributary - a news aggregation service.
#[derive(Parser, Debug)]
#[command(name = "tributary", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the aggregator workers and scheduler until interrupted.
    Serve,
    /// Run migrations, rebuild indexes, and declare every queue.
    Bootstrap {
        /// Drop queued messages and stored deferred messages.
        #[arg(long)]
        purge: bool,
    },
    /// Validate configuration and print the effective values.
    CheckConfig,
    /// Subscribe a composite to a bucket.
    Subscribe {
        composite: String,
        bucket: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Remove a composite's subscription to a bucket.
    Unsubscribe { composite: String, bucket: String },
    /// Add a JSON item to a bucket.
    AddItem { bucket: String, json: String },
    /// Schedule a JSON work message for later delivery.
    Defer {
        /// Delay from now, in seconds.
        #[arg(allow_negative_numbers = true)]
        seconds: i64,
        message_type: String,
        json: String,
        /// Idempotency key; deferring again with the same id replaces it.
        #[arg(long)]
        id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => tributary_config::load_and_validate_path(path),
        None => tributary_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            tributary_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: TributaryConfig) -> Result<(), TributaryError> {
    match command {
        Commands::Serve => return serve::run_serve(config).await,
        Commands::CheckConfig => {
            commands::check_config(&config);
            return Ok(());
        }
        _ => {}
    }

    serve::init_tracing(&config.service.log_level);
    let services = Services::open(config).await?;
    let result = admin(command, &services).await;
    services.close().await;
    result
}

async fn admin(command: Commands, services: &Services) -> Result<(), TributaryError> {
    match command {
        Commands::Bootstrap { purge } => {
            services.bootstrap(purge).await?;
            println!("bootstrap complete");
        }
        Commands::Subscribe {
            composite,
            bucket,
            title,
            url,
        } => {
            services.declare_queues(false).await?;
            let added =
                commands::subscribe(&services.ctx, &composite, &bucket, title.as_deref(), url.as_deref()).await?;
            println!("{composite} {} {bucket}", if added { "subscribed to" } else { "refreshed" });
        }
        Commands::Unsubscribe { composite, bucket } => {
            services.declare_queues(false).await?;
            let removed = commands::unsubscribe(&services.ctx, &composite, &bucket).await?;
            println!("{composite} {} {bucket}", if removed { "unsubscribed from" } else { "was not subscribed to" });
        }
        Commands::AddItem { bucket, json } => {
            services.declare_queues(false).await?;
            let added = commands::add_item(&services.ctx, &bucket, &json).await?;
            println!("{}", if added { "item added" } else { "item unchanged" });
        }
        Commands::Defer {
            seconds,
            message_type,
            json,
            id,
        } => {
            services.declare_queues(false).await?;
            let at = commands::defer(&services.dispatch, seconds, &message_type, &json, id).await?;
            println!("deferred {message_type} until {}", at.to_rfc3339());
        }
        Commands::Serve | Commands::CheckConfig => {}
    }
    Ok(())
}
