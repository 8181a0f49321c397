//! Settlement node
//!
//! Builds the VM registry and settlement engine from a configuration
//! file and replays scripted blocks against them.

mod config;
mod script;

use anyhow::{bail, Context, Result};
use chain_settlement::{SettlementEngine, StaticRates};
use chain_vm::{NativeVm, VmRegistry};
use clap::{Parser, Subcommand};
use config::NodeConfig;
use script::{parse_result_id, Replayer, Script};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chain-node")]
#[command(version)]
#[command(about = "Contract settlement node", long_about = None)]
struct Cli {
    /// Node configuration file (TOML)
    #[arg(short, long, env = "CHAIN_NODE_CONFIG")]
    config: Option<PathBuf>,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, env = "CHAIN_NODE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON block script
    Replay {
        /// Script file
        script: PathBuf,

        /// Undo every block at or after this height once the script ends
        #[arg(long)]
        undo_to: Option<u64>,

        /// Print a recorded result (block.op.call) after the replay
        #[arg(long = "show")]
        show: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_engine(config: &NodeConfig) -> Result<(SettlementEngine, Arc<StaticRates>)> {
    let rates = Arc::new(StaticRates::from_entries(&config.settlement.exchange_rates));
    let vms = VmRegistry::builder()
        .register(Box::new(NativeVm::new(config.gas.clone())))?
        .build();
    let db = config.database.open()?;
    let engine = SettlementEngine::new(config.settlement.clone(), db, vms, rates.clone())?;
    // Native contract state is not persisted
    if engine.has_history()? {
        bail!(
            "Database at {} already holds ledger state up to block {:?}; \
             replay needs an empty data directory",
            config.database.path.display(),
            engine.head()
        );
    }
    Ok((engine, rates))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs);

    let config = match &cli.config {
        Some(path) => NodeConfig::load_from_file(path)?,
        None => NodeConfig::default(),
    };

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
        Commands::Replay {
            script,
            undo_to,
            show,
        } => {
            let script = Script::load_from_file(&script)?;
            let (mut engine, rates) = build_engine(&config)?;
            let summary = Replayer::new(&mut engine, &rates).run(&script, undo_to)?;
            info!(
                "Replay finished at head {:?} with {} operation(s)",
                summary.head,
                summary.operations.len()
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);

            for text in &show {
                let id = parse_result_id(text)?;
                let result = engine
                    .get_result(&id)?
                    .with_context(|| format!("No result recorded under {}", id))?;
                let attracted = engine.get_attracted_contracts_for(&id)?.unwrap_or_default();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "id": id.to_string(),
                        "result": result,
                        "output_hex": hex::encode(&result.output),
                        "attracted": attracted,
                    }))?
                );
            }
        }
    }

    Ok(())
}
