//! Coin store inspection tool.
//!
//! Opens a RocksDB coin store (behind the write-back cache) and reports its
//! tip, looks up transactions, prints statistics, or rewinds blocks.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use coinview_core::{rewind_blocks, CoinView, NetworkKind, TxId, UnspentOutputs};
use coinview_store::{CachedCoinView, RocksCoinView, StoreConfig};

/// Inspect and maintain a coin store.
#[derive(Parser, Debug)]
#[command(name = "coinview", version, about = "UTXO coin store inspection tool")]
struct Cli {
    /// Configuration file (TOML). COINVIEW__* environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the coin database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Network: mainnet, testnet or regtest
    #[arg(long, global = true)]
    network: Option<NetworkKind>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the current tip.
    Tip,
    /// Look up unspent outputs by transaction id.
    Fetch {
        /// Transaction ids in display hex
        #[arg(required = true)]
        txids: Vec<TxId>,
    },
    /// Revert the most recent blocks using the undo log.
    Rewind {
        /// Number of blocks to rewind
        #[arg(long, default_value_t = 1)]
        blocks: usize,
    },
    /// Print record counts and undo depth.
    Stats {
        /// Count coin records with a full scan instead of RocksDB's estimate
        #[arg(long)]
        exact: bool,
    },
}

impl Cli {
    /// Merge command-line overrides into the loaded configuration.
    fn store_config(&self) -> Result<StoreConfig> {
        let mut config = StoreConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.store_config()?;

    init_logging(&config.log_level, &cli.log_format);

    let params = config.chain_params()?;
    let db_path = config.db_path();
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create {}", db_path.display()))?;

    info!(network = ?config.network, path = %db_path.display(), "opening coin store");
    let rocks = Arc::new(
        RocksCoinView::open(&db_path, config.backend_options(&params))
            .context("failed to open coin database")?,
    );
    let cache = CachedCoinView::start(rocks.clone(), config.cache_options(&params)).await?;

    let result = run(&cli, &cache, &rocks).await;

    cache.shutdown().await?;
    rocks.close().await?;
    result
}

async fn run(cli: &Cli, cache: &CachedCoinView, rocks: &RocksCoinView) -> Result<()> {
    match &cli.command {
        Commands::Tip => {
            let tip = cache.tip().await?;
            if cli.json {
                println!("{}", json!({ "tip": tip.to_string() }));
            } else {
                println!("{tip}");
            }
        }
        Commands::Fetch { txids } => {
            let result = cache.fetch(txids).await?;
            if cli.json {
                let records: Vec<_> = txids
                    .iter()
                    .zip(&result.outputs)
                    .map(|(txid, coins)| {
                        json!({
                            "txid": txid.to_string(),
                            "coins": coins.as_ref().map(coins_json),
                        })
                    })
                    .collect();
                let report = json!({ "tip": result.tip.to_string(), "records": records });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("tip {}", result.tip);
                for (txid, coins) in txids.iter().zip(&result.outputs) {
                    match coins {
                        Some(coins) => print_coins(coins),
                        None => println!("{txid}: not found"),
                    }
                }
            }
        }
        Commands::Rewind { blocks } => {
            let tips = rewind_blocks(cache, *blocks).await?;
            if cli.json {
                let tips: Vec<String> = tips.iter().map(ToString::to_string).collect();
                println!("{}", json!({ "tips": tips }));
            } else {
                for tip in &tips {
                    println!("rewound to {tip}");
                }
            }
        }
        Commands::Stats { exact } => {
            let tip = rocks.tip().await?;
            let coins = if *exact {
                rocks.coin_count().await?
            } else {
                rocks.estimated_coin_count().await?
            };
            let undo_depth = rocks.undo_depth().await?;
            if cli.json {
                let report = json!({
                    "tip": tip.to_string(),
                    "coins": coins,
                    "coins_exact": exact,
                    "undo_depth": undo_depth,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("tip        {tip}");
                let label = if *exact { "coins" } else { "coins ~" };
                println!("{label:<10} {coins}");
                println!("undo depth {undo_depth}");
            }
        }
    }
    Ok(())
}

fn coins_json(coins: &UnspentOutputs) -> serde_json::Value {
    let outputs: Vec<_> = coins
        .outputs()
        .iter()
        .enumerate()
        .filter_map(|(index, out)| out.as_ref().map(|out| (index, out)))
        .map(|(index, out)| {
            json!({
                "index": index,
                "value": out.value,
                "script_pubkey": hex::encode(&out.script_pubkey),
            })
        })
        .collect();
    json!({
        "height": coins.height,
        "coinbase": coins.is_coinbase,
        "coinstake": coins.is_coinstake,
        "unspent": coins.unspent_count(),
        "outputs": outputs,
    })
}

fn print_coins(coins: &UnspentOutputs) {
    println!(
        "{}: height {} unspent {}/{}",
        coins.txid,
        coins.height,
        coins.unspent_count(),
        coins.len()
    );
    for (index, out) in coins.outputs().iter().enumerate() {
        if let Some(out) = out {
            println!("  #{index} {} {}", out.value, hex::encode(&out.script_pubkey));
        }
    }
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG`, when set, takes precedence over `level_str`.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    // Logs go to stderr so command output stays machine-readable.
    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
