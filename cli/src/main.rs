//! chainwatch CLI: validate watcher configs and manage checkpoints.
//!
//! Usage:
//! ```bash
//! chainwatch validate  ./pools.json
//! chainwatch checkpoint ./watcher.db
//! chainwatch checkpoint ./watcher.db ethereum pools
//! chainwatch reset      ./watcher.db ethereum pools
//! chainwatch info
//! ```
//!
//! Log output follows `RUST_LOG` when set, otherwise the `log_level` of the
//! loaded config (or `info`).

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainwatch_core::checkpoint::{CheckpointManager, CheckpointStore};
use chainwatch_core::config::WatcherConfig;
use chainwatch_storage::SqliteCheckpointStore;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let res = match args[1].as_str() {
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainwatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        "validate" => cmd_validate(&args[2..]),
        "checkpoint" => cmd_checkpoint(&args[2..]).await,
        "reset" => cmd_reset(&args[2..]).await,
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = res {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainwatch {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-aware EVM log watcher\n");
    println!("USAGE:");
    println!("    chainwatch <COMMAND> [ARGS]\n");
    println!("COMMANDS:");
    println!("    validate <config.json>             Check a watcher config");
    println!("    checkpoint <db> [<chain> <id>]     Show stored checkpoints");
    println!("    reset <db> <chain> <id>            Delete a checkpoint (next run is a first run)");
    println!("    info                               Show default settings");
    println!("    version                            Print version");
    println!("    help                               Print this help");
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn cmd_info() {
    let d = WatcherConfig::default();
    println!("ChainWatch v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default scan width: {} blocks/cycle", d.scan_width);
    println!("  Default go-back retries: {}", d.max_go_back_retries);
    println!("  Default loop interval: {}s", d.loop_interval_secs);
    println!("  Default poll policy: {}", d.poll_policy);
    println!(
        "  Default fetch retries: {} (every {}ms)",
        d.fetch_retries, d.fetch_retry_delay_ms
    );
    println!("  Checkpoint backends: memory, SQLite");
}

fn load_config(path: &str) -> Result<WatcherConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let config: WatcherConfig =
        serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;
    Ok(config)
}

fn cmd_validate(args: &[String]) -> Result<()> {
    let [path] = args else {
        bail!("usage: chainwatch validate <config.json>");
    };
    let config = load_config(path)?;
    init_tracing(&config.log_level);
    config.validate()?;

    tracing::info!(id = %config.id, chain = %config.chain, "config is valid");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn cmd_checkpoint(args: &[String]) -> Result<()> {
    init_tracing("info");
    match args {
        [db] => {
            let store = SqliteCheckpointStore::open(db).await?;
            let checkpoints = store.list().await?;
            if checkpoints.is_empty() {
                println!("no checkpoints in {db}");
            }
            for cp in checkpoints {
                println!(
                    "{:<12} {:<24} block {:>12}  updated_at {}",
                    cp.chain_id, cp.watcher_id, cp.block_number, cp.updated_at
                );
            }
            Ok(())
        }
        [db, chain, id] => {
            let manager = manager(db, chain, id).await?;
            match manager.get_checkpoint().await? {
                Some(block) => println!("{chain}/{id}: block {block}"),
                None => println!("{chain}/{id}: no checkpoint (next run starts at start_block)"),
            }
            Ok(())
        }
        _ => bail!("usage: chainwatch checkpoint <db> [<chain> <id>]"),
    }
}

async fn cmd_reset(args: &[String]) -> Result<()> {
    init_tracing("info");
    let [db, chain, id] = args else {
        bail!("usage: chainwatch reset <db> <chain> <id>");
    };
    let manager = manager(db, chain, id).await?;
    manager.reset().await?;
    tracing::info!(%chain, %id, "checkpoint reset");
    println!("{chain}/{id}: checkpoint deleted");
    Ok(())
}

async fn manager(db: &str, chain: &str, id: &str) -> Result<CheckpointManager> {
    let store: Arc<dyn CheckpointStore> = Arc::new(
        SqliteCheckpointStore::open(db)
            .await
            .with_context(|| format!("opening {db}"))?,
    );
    Ok(CheckpointManager::new(store, chain, id))
}
