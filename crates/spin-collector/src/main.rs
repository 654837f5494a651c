//! Spin collector binary
//!
//! `run` (the default) collects until Ctrl-C. The other subcommands work on
//! the persisted spins without polling.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use delivery::HttpSink;
use shared::Config;
use spin_collector::{
    Collector, FileScraper, FileStore, HttpScraper, NullScraper, Scraper, DEFAULT_TOP_K,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "spin-collector", version, about = "Roulette spin collector")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect spins until interrupted
    Run,
    /// Print the persisted spins as JSON
    Export,
    /// Print statistics over the persisted spins
    Stats {
        /// Number of most frequent pockets to list
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top: usize,
    },
    /// Post every persisted spin to the API again, one request each
    Resend,
    /// Check whether the API is reachable
    Status,
}

fn build_scraper(config: &Config) -> Result<Arc<dyn Scraper>> {
    let collector = &config.collector;

    if let Some(url) = &collector.scrape_url {
        let scraper = HttpScraper::new(
            url,
            collector.scrape_anchor.clone(),
            Duration::from_secs(config.sink.timeout_secs),
        )
        .context("Failed to create page scraper")?;
        return Ok(Arc::new(scraper));
    }

    if let Some(path) = &collector.scrape_file {
        return Ok(Arc::new(FileScraper::new(
            path.clone(),
            collector.scrape_anchor.clone(),
        )));
    }

    anyhow::bail!("SCRAPE_URL or SCRAPE_FILE must be set to collect spins")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    shared::init_tracing();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    let command = cli.command.unwrap_or(Command::Run);
    let scraper: Arc<dyn Scraper> = match command {
        Command::Run => build_scraper(&config)?,
        _ => Arc::new(NullScraper),
    };

    let store = Arc::new(FileStore::new(config.collector.storage_dir.clone()));
    let sink = HttpSink::from_config(&config.sink).context("Failed to create API sink")?;
    let collector = Collector::new(&config, scraper, store, Arc::new(sink));

    match command {
        Command::Run => {
            tracing::info!(api_url = %config.sink.api_url, "Starting spin collector...");

            collector
                .start()
                .await
                .context("Failed to start collector")?;

            signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping collector...");

            let stats = collector.stop().await;
            println!("{}", collector.summarize(DEFAULT_TOP_K));
            println!("Sent to API: {}", stats.sent);
            println!("Send failures: {}", stats.failed);

            // Give the final detached delivery a moment to leave
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Command::Export => {
            println!("{}", collector.export_snapshot()?);
        }
        Command::Stats { top } => {
            print!("{}", collector.summarize(top));
        }
        Command::Resend => {
            let report = collector.resend_all().await;
            println!("Attempted: {}", report.attempted);
            println!("Succeeded: {}", report.succeeded);
            println!("Failed: {}", report.failed);
        }
        Command::Status => {
            if collector.api_status().await {
                println!("API available at {}", config.sink.api_url);
            } else {
                println!("API unavailable at {}", config.sink.api_url);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
