use anyhow::{anyhow, Result};
use cex_arbitrage_scanner::{bot::ArbitrageScanner, config::Config, report};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "cex-arb", about = "Cross-exchange spot arbitrage scanner")]
struct Cli {
    /// Extra configuration file layered over config/default.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh cached market lists for every configured exchange
    UpdateMarkets,
    /// Print or write the cached market lists
    DumpMarkets {
        #[arg(long, value_delimiter = ',')]
        exchanges: Vec<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Fetch a sample of order books and report how many were usable
    FetchOrderbooks {
        #[arg(long)]
        exchange: String,
        #[arg(long, default_value_t = 10)]
        sample: usize,
    },
    /// Scan every common symbol between two exchanges
    ScanSimple {
        #[arg(long)]
        a: String,
        #[arg(long)]
        b: String,
        #[arg(long)]
        watch: bool,
    },
    /// Search multi-hop routes across one or more exchanges
    ScanRoutes {
        #[arg(long, value_delimiter = ',', required = true)]
        exchanges: Vec<String>,
        #[arg(long)]
        start: String,
        #[arg(long)]
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    let level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        anyhow!(e)
    })?;

    info!("Configuration loaded successfully");

    let mut scanner = ArbitrageScanner::new(config).await.map_err(|e| {
        error!("Failed to initialize scanner: {}", e);
        e
    })?;

    match cli.command {
        Command::UpdateMarkets => {
            for (exchange, result) in scanner.update_markets().await {
                match result {
                    Ok(count) => println!("{}: {} markets", exchange, count),
                    Err(e) => println!("{}: failed ({})", exchange, e),
                }
            }
        }
        Command::DumpMarkets { exchanges, out } => {
            let dump = scanner.dump_markets(&exchanges).await?;
            let json = serde_json::to_string_pretty(&dump)?;
            match out {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        if !parent.as_os_str().is_empty() {
                            std::fs::create_dir_all(parent)?;
                        }
                    }
                    std::fs::write(&path, json)
                        .map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))?;
                    info!("Wrote markets to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        Command::FetchOrderbooks { exchange, sample } => {
            let summary = scanner.fetch_orderbooks(&exchange, sample).await?;
            println!(
                "{}: {}/{} order books with both sides",
                summary.exchange, summary.fetched, summary.requested
            );
        }
        Command::ScanSimple { a, b, watch: true } => {
            tokio::select! {
                result = scanner.watch(&a, &b) => {
                    if let Err(e) = result {
                        error!("Watch loop error: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                }
            }
        }
        Command::ScanSimple { a, b, watch: false } => {
            let scan = scanner.scan_two_exchanges(&a, &b).await?;
            if !scan.skipped.is_empty() {
                warn!("{} legs or directions skipped", scan.skipped.len());
            }
            if scan.opportunities.is_empty() {
                println!("No opportunities above threshold across {} pairs", scan.pairs_scanned);
            } else {
                println!("{}", report::opportunity_table(&scan.opportunities));
            }
            info!("{}", scanner.metrics().generate_report());
        }
        Command::ScanRoutes {
            exchanges,
            start,
            target,
        } => {
            let routes = scanner.scan_routes(&exchanges, &start, target.as_deref()).await?;
            if routes.is_empty() {
                println!("No profitable routes from {}", start.to_uppercase());
            } else {
                println!("{}", report::route_table(&routes));
            }
            info!("{}", scanner.metrics().generate_report());
        }
    }

    info!("Scanner shutdown complete");
    Ok(())
}
