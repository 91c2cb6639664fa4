#![forbid(unsafe_code)]
//! Headless ledger node: restores the chain, runs the miner, saves on exit.

use clap::Parser;
use procledger::config::load_config_from;
use procledger::node::Node;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "procledger-node", about = "Run a procledger ledger node")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Force-enable the miner regardless of configuration
    #[arg(long)]
    mine: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = load_config_from(&args.config)?;
    if args.mine {
        config.miner.enabled = true;
    }

    info!(
        difficulty = config.chain.difficulty,
        mining_reward = config.chain.mining_reward,
        db = %config.database.path,
        "starting procledger node"
    );

    let mut node = Node::init(config)?;
    node.start_miner();

    let blockchain = node.blockchain();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(10)) => {
                let chain = blockchain.read().await;
                info!(
                    height = chain.len(),
                    pending = chain.pending().len(),
                    tip = %chain.latest_block().hash,
                    "node running"
                );
            }
        }
    }

    node.shutdown().await?;
    info!("chain snapshot saved, goodbye");
    Ok(())
}
