//! uptrail - endpoint uptime crawler.
//!
//! `crawl` probes endpoints and stores up/down observations; `stat` rebuilds
//! uptime statistics from what was stored.

mod config;
mod db;
mod probe;
mod scheduler;
mod stats;

use config::{normalize_endpoint, parse_time_arg, Args, Command, CrawlArgs, CrawlConfig, StatArgs};
use db::Store;
use scheduler::{run_crawler, ProbeEngine};
use stats::{render_json, render_text, Collector};

use chrono::{Local, Utc};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptrail=info".parse()?))
        .init();

    let args = Args::parse();

    let result = match &args.command {
        Command::Crawl(crawl_args) => crawl(&args, crawl_args).await,
        Command::Stat(stat_args) => stat(&args, stat_args).await,
    };

    if let Err(e) = &result {
        tracing::error!("{}", e);
    }
    result
}

async fn crawl(args: &Args, crawl_args: &CrawlArgs) -> Result<(), BoxError> {
    let cfg = CrawlConfig::load(crawl_args)?;
    tracing::info!(
        "Loaded {} endpoints from {}",
        cfg.endpoints.len(),
        crawl_args.config.display()
    );

    let store = Store::connect(&args.db, args.db_retries).await?;
    tracing::info!(
        "Using database at {} ({} observations stored)",
        args.db.display(),
        store.count_observations()?
    );

    let engine = ProbeEngine::new(&cfg)?;
    let committed = run_crawler(engine, &store, cfg.flush_period, shutdown_signal()).await?;

    tracing::info!("Crawler stopped after committing {} observations", committed);
    Ok(())
}

async fn stat(args: &Args, stat_args: &StatArgs) -> Result<(), BoxError> {
    let now = Local::now();
    let from = parse_time_arg(&stat_args.from, now)?;
    let to = match &stat_args.to {
        Some(raw) => parse_time_arg(raw, now)?,
        None => now.with_timezone(&Utc),
    };

    let endpoints = stat_args
        .endpoints
        .iter()
        .map(|e| normalize_endpoint(e))
        .collect::<Result<Vec<_>, _>>()?;

    let store = Store::connect(&args.db, args.db_retries).await?;
    let stats = Collector::new(store).collect(from, to, &endpoints)?;

    if stat_args.json {
        println!("{}", render_json(&stats)?);
    } else {
        for s in &stats {
            print!("{}", render_text(s));
        }
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}
