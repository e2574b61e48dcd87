#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the Taiwan air-quality monitor.

mod print;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use taiwan_aqm_config::{DEFAULT_PATH, migration};
use taiwan_aqm_coordinator::AirQualityMonitor;
use taiwan_aqm_coordinator::monitor::{micro_fetcher, site_fetcher};
use taiwan_aqm_source::notify::{LogNotifier, Notifier};
use taiwan_aqm_source::retry::{FetchOutcome, RetryPolicy, retry_strategy};
use taiwan_aqm_source::{FetchStrategy, micro_sensor, registry, things};
use taiwan_aqm_source_models::Snapshot;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "taiwan_aqm", about = "Taiwan air quality monitor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every configured feed and print each new snapshot until Ctrl-C
    Run {
        #[arg(long, default_value = DEFAULT_PATH)]
        config: PathBuf,
    },
    /// Fetch one feed once, with retries, and print the result
    Fetch {
        feed: Feed,
        #[arg(long, default_value = DEFAULT_PATH)]
        config: PathBuf,
    },
    /// Resolve a micro sensor station id to its `SensorThings` Thing id
    LookupThing {
        /// Business station id (e.g. "10287843")
        station_id: String,
        #[arg(long, default_value = micro_sensor::DEFAULT_URL)]
        url: String,
        /// Verify the upstream TLS certificate chain
        #[arg(long)]
        verify_tls: bool,
    },
    /// List the registered government monitoring stations
    Sites,
    /// Print a config file migrated to the current version
    Migrate {
        #[arg(long, default_value = DEFAULT_PATH)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Feed {
    /// Fixed government stations
    Sites,
    /// `SensorThings` micro sensors
    Micro,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&config).await?,
        Commands::Fetch { feed, config } => {
            let config = taiwan_aqm_config::load(&config)?;
            match feed {
                Feed::Sites => {
                    let fetcher = site_fetcher(&config)?;
                    let snapshot = fetch_once(&fetcher, &config.site_feed.retry.policy()).await?;
                    print!("{}", print::render_sites(&snapshot));
                }
                Feed::Micro => {
                    let fetcher = micro_fetcher(&config)?;
                    let snapshot = fetch_once(&fetcher, &config.micro_feed.retry.policy()).await?;
                    print!("{}", print::render_micro(&snapshot));
                }
            }
        }
        Commands::LookupThing {
            station_id,
            url,
            verify_tls,
        } => {
            let client = taiwan_aqm_source::http::build_client(!verify_tls)?;
            match things::lookup_thing_id(&client, &url, &station_id).await? {
                Some(thing_id) => println!("{station_id} -> {thing_id}"),
                None => return Err(format!("No Thing registered for station {station_id}").into()),
            }
        }
        Commands::Sites => {
            println!("{:<6} NAME", "ID");
            println!("{}", "-".repeat(30));
            for site in registry::all_sites() {
                println!("{:<6} {}", site.id, site.name);
            }
        }
        Commands::Migrate { config } => {
            let text = std::fs::read_to_string(&config)
                .map_err(|e| format!("Failed to read {}: {e}", config.display()))?;
            let table = migration::migrate(text.parse::<toml::Table>()?)?;
            print!("{}", toml::to_string(&table)?);
        }
    }

    Ok(())
}

async fn fetch_once<S: FetchStrategy>(
    strategy: &S,
    policy: &RetryPolicy,
) -> Result<Snapshot<S::Record>, Box<dyn std::error::Error>> {
    match retry_strategy(strategy, policy, &LogNotifier).await {
        FetchOutcome::Fetched(snapshot) => Ok(snapshot),
        FetchOutcome::Exhausted {
            attempts,
            last_error,
        } => Err(format!("No data after {attempts} attempts: {last_error}").into()),
        FetchOutcome::AuthRejected(e) => Err(e.into()),
    }
}

async fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = taiwan_aqm_config::load(path)?;
    if !config.has_stations() {
        return Err(format!("{} configures no sites or micro_sensors", path.display()).into());
    }

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let monitor = AirQualityMonitor::from_config(&config, &notifier)?;
    monitor.setup().await?;

    let mut printers = Vec::new();
    if let Some(site) = monitor.site() {
        printers.push(tokio::spawn(print_updates(site.subscribe(), print::render_sites)));
    }
    if let Some(micro) = monitor.micro() {
        printers.push(tokio::spawn(print_updates(micro.subscribe(), print::render_micro)));
    }

    log::info!("Monitoring; press Ctrl-C to stop");
    let signal = tokio::signal::ctrl_c().await;

    for printer in &printers {
        printer.abort();
    }
    futures::future::join_all(printers).await;
    monitor.shutdown().await;

    signal?;
    Ok(())
}

/// Prints the current snapshot, then every replacement.
async fn print_updates<R>(
    mut updates: watch::Receiver<Arc<Snapshot<R>>>,
    render: fn(&Snapshot<R>) -> String,
) {
    loop {
        let text = render(&updates.borrow_and_update());
        print!("{text}");
        if updates.changed().await.is_err() {
            break;
        }
    }
}
