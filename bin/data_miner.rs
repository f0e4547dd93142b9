//! # Data Miner Service
//!
//! Captures DLMM pool snapshots on a fixed schedule and keeps the relational
//! index in sync with the snapshot files on disk.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin data_miner -- run              # scheduler, Ctrl+C to stop
//! cargo run --bin data_miner -- once --top 10    # single capture
//! cargo run --bin data_miner -- reconcile        # index files missing from the store
//! cargo run --bin data_miner -- defragment       # sort legacy flat files into date folders
//! cargo run --bin data_miner -- backfill-tokens  # fill null token columns from raw_data
//! ```
//!
//! `--dry-run` swaps PostgreSQL for an in-memory store.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use dlmm_data_miner::{
    database::{self, PgRepository, SnapshotRepository},
    defragmenter::defragment,
    directory_reconciler::reconcile,
    opportunities::rank_opportunities,
    DataEngine, DataIndexer, MemoryRepository, RateLimitedFetcher, Settings,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[command(name = "data_miner", version, about = "DLMM pool snapshot miner")]
struct Cli {
    /// Use an in-memory store instead of PostgreSQL
    #[arg(long, global = true)]
    dry_run: bool,

    /// Settings file
    #[arg(long, global = true, default_value = "Config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run captures at the configured interval until Ctrl+C
    Run,
    /// Run a single capture and print the best pools
    Once {
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Index snapshot files that are not in the store yet
    Reconcile { dir: Option<PathBuf> },
    /// Move legacy `<epochMillis>_historical_data_<id>.json` files into date folders
    Defragment { dir: Option<PathBuf> },
    /// Fill missing token symbol/address columns from raw_data
    BackfillTokens,
}

fn init_logging() {
    #[cfg(feature = "observability")]
    {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::INFO)
            .init();
    }
    #[cfg(not(feature = "observability"))]
    {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
}

async fn open_repository(settings: &Settings, dry_run: bool) -> Result<Arc<dyn SnapshotRepository>> {
    if dry_run {
        println!("🧪 Dry run: using in-memory store");
        return Ok(Arc::new(MemoryRepository::new()));
    }
    let pool = database::connect(&settings.database).await?;
    println!("✅ Database connected");
    Ok(Arc::new(PgRepository::new(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let settings = Settings::from_file(&cli.config)?;
    println!("✅ Settings loaded");

    match cli.command {
        Command::Run => {
            let repo = open_repository(&settings, cli.dry_run).await?;
            let fetcher = Arc::new(RateLimitedFetcher::with_reqwest(settings.rate_limit.clone())?);
            let engine = Arc::new(DataEngine::new(settings, fetcher, repo));

            println!("🚀 Data engine running, press Ctrl+C to stop gracefully...");
            engine
                .execute_at_interval(async {
                    if let Err(e) = signal::ctrl_c().await {
                        log::error!("Failed to listen for Ctrl+C: {}", e);
                    }
                })
                .await?;
            println!("✅ Shutdown complete");
        }
        Command::Once { top } => {
            let repo = open_repository(&settings, cli.dry_run).await?;
            let fetcher = Arc::new(RateLimitedFetcher::with_reqwest(settings.rate_limit.clone())?);
            let blue_chips = settings.opportunities.blue_chips.clone();
            let engine = DataEngine::new(settings, fetcher, repo);

            let report = engine.run_cycle().await?;
            println!(
                "✅ Capture {}: {} pools, {} unmatched, file: {}",
                report.query_key,
                report.pools.len(),
                report.unmatched.len(),
                report
                    .snapshot_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "not written".to_string())
            );

            for (rank, opportunity) in rank_opportunities(&report.pools, &blue_chips)
                .iter()
                .take(top)
                .enumerate()
            {
                println!(
                    "  {:>2}. {:<20} bin {:>4}  fee {:.4}%  tvl ${:>14.2}  fee/tvl min {:.6}  {}{}",
                    rank + 1,
                    opportunity.pair_name,
                    opportunity.bin_step,
                    opportunity.base_fee * 100.0,
                    opportunity.liquidity_usd,
                    opportunity.fee_to_tvl.min,
                    opportunity.trend,
                    if opportunity.bluechip { "  💎" } else { "" }
                );
            }
        }
        Command::Reconcile { dir } => {
            let root = dir.unwrap_or_else(|| settings.storage.category_dir());
            let repo = open_repository(&settings, cli.dry_run).await?;
            let indexer = DataIndexer::new(repo, settings.storage.insert_batch_size);

            let summary = reconcile(&root, &indexer).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Defragment { dir } => {
            let root = dir.unwrap_or_else(|| settings.storage.category_dir());
            let repo = open_repository(&settings, cli.dry_run).await?;
            let indexer = DataIndexer::new(repo, settings.storage.insert_batch_size);

            let report = defragment(&root, &indexer).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::BackfillTokens => {
            if cli.dry_run {
                bail!("backfill-tokens needs PostgreSQL; drop --dry-run");
            }
            let pool = database::connect(&settings.database).await?;
            let updated = PgRepository::new(pool).backfill_token_columns().await?;
            println!("✅ Backfilled token columns on {} pool rows", updated);
        }
    }

    Ok(())
}
