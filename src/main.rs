//! Pilah CLI
//!
//! Terminal front end for the weight aggregator:
//! - Watch the live dashboard
//! - Print a one-off status snapshot
//! - Reset the persisted totals
//! - Generate a config file

use anyhow::Context;
use clap::{Parser, Subcommand};
use pilah::config::{generate_default_config, Config, LoggingConfig};
use pilah::{Aggregator, DashboardSnapshot, FirebaseFeed, RemoteFeed, StubFeed};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "pilah")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Processed weight and earnings monitor for waste sorting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the dashboard on every change until Ctrl-C
    Watch {
        /// Run against the offline stub feed
        #[arg(long)]
        stub: bool,
    },

    /// Connect, wait for data and print the current state as JSON
    Status {
        /// Seconds to wait for data after connecting
        #[arg(short, long, default_value = "3")]
        wait: u64,
    },

    /// Zero the persisted weight and earnings
    Reset,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => Config::load_default(),
    };

    init_logging(&config.logging);

    match cli.command {
        Commands::Watch { stub } => {
            let feed: Arc<dyn RemoteFeed> = if stub {
                Arc::new(StubFeed::new())
            } else {
                Arc::new(FirebaseFeed::new(config.firebase.clone())?)
            };
            let aggregator = Aggregator::new(feed, config.aggregator_config());

            let observer = aggregator.clone();
            let _handle = aggregator.subscribe(move || {
                println!("{}", render_line(&observer.dashboard()));
            });

            if !aggregator.connect().await {
                tracing::warn!("Feed unavailable, showing last known values");
            }
            println!("{}", render_line(&aggregator.dashboard()));

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down...");
            aggregator.cleanup();
        }

        Commands::Status { wait } => {
            let feed = Arc::new(FirebaseFeed::new(config.firebase.clone())?);
            let aggregator = Aggregator::new(feed, config.aggregator_config());

            if aggregator.connect().await {
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }

            let status = serde_json::json!({
                "debug": aggregator.debug_info(),
                "dashboard": aggregator.dashboard(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            aggregator.cleanup();
        }

        Commands::Reset => {
            let feed = Arc::new(FirebaseFeed::new(config.firebase.clone())?);
            let aggregator = Aggregator::new(feed, config.aggregator_config());

            if !aggregator.connect().await {
                anyhow::bail!("could not connect to {}", config.firebase.database_url);
            }

            aggregator.reset();
            aggregator.flush().await;
            aggregator.cleanup();
            println!("Persisted totals reset");
        }

        Commands::Config { output } => {
            let contents = generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &contents)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", contents);
                }
            }
        }
    }

    Ok(())
}

/// Logs go to stderr so JSON output on stdout stays clean
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pilah={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn render_line(d: &DashboardSnapshot) -> String {
    let status = if d.connected { "online " } else { "offline" };
    let chart = d
        .chart_series
        .iter()
        .map(|g| g.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "[{}] {:>8.2} kg | now {:>7.1} g | Rp {:>9} sorted | Rp {:>9} unsorted | +Rp {} | cycles {} | chart [{}]",
        status,
        d.processed_weight_kg,
        d.realtime_weight_grams,
        d.earnings.after_sorting,
        d.earnings.before_sorting,
        d.profit.profit_difference,
        d.earnings.completed_cycles,
        chart,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_watch_stub() {
        let cli = Cli::parse_from(["pilah", "watch", "--stub", "--config", "/tmp/p.toml"]);
        assert!(matches!(cli.command, Commands::Watch { stub: true }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
    }
}
