//! Process-level orchestration: snapshot restore at startup, the background
//! miner, candidate-chain ingestion, and snapshot save at shutdown.

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::config::Config;
use crate::error::ChainError;
use crate::persistence::{Database, InMemoryPersistence, Persistence};
use crate::transaction::Transaction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const MINER_TICK: Duration = Duration::from_millis(200);

pub struct Node {
    pub config: Config,
    persistence: Arc<Box<dyn Persistence>>,
    blockchain: Arc<RwLock<Blockchain>>,
    mining_cancel: Arc<AtomicBool>,
    shutdown_flag: Arc<AtomicBool>,
    miner_task: Option<JoinHandle<()>>,
}

impl Node {
    /// Initialize the node: open persistence, then load the snapshot or
    /// create a fresh chain.
    ///
    /// A present-but-invalid snapshot is fatal (`LoadCorrupt`); the operator
    /// must repair or discard the store explicitly.
    pub fn init(config: Config) -> Result<Self, ChainError> {
        if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let persistence: Box<dyn Persistence> = match Database::open(&config.database.path) {
            Ok(db) => Box::new(db),
            Err(e) => {
                warn!(
                    "Failed to open DB at {}: {}. Falling back to in-memory persistence.",
                    config.database.path, e
                );
                Box::new(InMemoryPersistence::new())
            }
        };

        Self::init_with_persistence(config, persistence)
    }

    /// Initialize with an explicit persistence backend.
    pub fn init_with_persistence(
        config: Config,
        persistence: Box<dyn Persistence>,
    ) -> Result<Self, ChainError> {
        let blockchain = match persistence.load_chain()? {
            Some(blocks) => {
                let chain = Blockchain::from_snapshot(
                    blocks,
                    config.chain.difficulty,
                    config.chain.mining_reward,
                )?;
                info!(height = chain.len(), "restored chain from snapshot");
                chain
            }
            None => {
                info!("no snapshot found, creating fresh chain");
                Blockchain::new(config.chain.difficulty, config.chain.mining_reward)
            }
        };

        Ok(Self {
            config,
            persistence: Arc::new(persistence),
            blockchain: Arc::new(RwLock::new(blockchain)),
            mining_cancel: Arc::new(AtomicBool::new(false)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            miner_task: None,
        })
    }

    /// Shared handle to the chain, for embedders that need direct access.
    pub fn blockchain(&self) -> Arc<RwLock<Blockchain>> {
        self.blockchain.clone()
    }

    /// Start the background miner when enabled by configuration.
    ///
    /// Mining is CPU-bound, so the loop runs on a blocking task. Each round
    /// takes the single write lock, mines cancellably, persists the grown
    /// chain, then sleeps for the configured interval (in small ticks so
    /// shutdown stays responsive).
    pub fn start_miner(&mut self) {
        if !self.config.miner.enabled || self.miner_task.is_some() {
            return;
        }

        let bc = self.blockchain.clone();
        let persistence = self.persistence.clone();
        let cancel = self.mining_cancel.clone();
        let shutdown = self.shutdown_flag.clone();
        let beneficiary = self.config.miner.beneficiary.clone();
        let interval = Duration::from_secs(self.config.miner.interval_secs);

        let handle = tokio::task::spawn_blocking(move || {
            info!(%beneficiary, "miner started");
            while !shutdown.load(Ordering::Relaxed) {
                {
                    let mut chain = bc.blocking_write();
                    if !chain.pending().is_empty() {
                        match chain.mine_pending_transactions_cancellable(&beneficiary, &cancel) {
                            Ok(block) => {
                                if let Err(e) = persistence.save_chain(&chain.export_chain()) {
                                    error!(
                                        "Failed to persist chain after mining block {}: {}",
                                        block.index, e
                                    );
                                }
                            }
                            Err(ChainError::MiningInterrupted) => {
                                info!("mining round interrupted");
                            }
                            Err(e) => warn!("Mining failed: {}", e),
                        }
                    }
                }

                let mut slept = Duration::ZERO;
                while slept < interval && !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(MINER_TICK);
                    slept += MINER_TICK;
                }
            }
            info!("miner stopped");
        });

        self.miner_task = Some(handle);
    }

    /// Submit a validated transaction to the pool.
    pub async fn add_transaction(&self, tx: Transaction) -> Result<(), ChainError> {
        self.blockchain.write().await.add_transaction(tx)
    }

    /// Hand a candidate chain from the network layer to the fork-choice
    /// rule. An in-progress mine is aborted first so the miner does not
    /// finish a block on top of a superseded tail.
    ///
    /// Rejection is non-fatal: the current chain is untouched and the error
    /// describes why the candidate lost.
    pub async fn submit_candidate(&self, candidate: Vec<Block>) -> Result<(), ChainError> {
        self.mining_cancel.store(true, Ordering::Relaxed);
        let mut chain = self.blockchain.write().await;
        self.mining_cancel.store(false, Ordering::Relaxed);

        chain.replace_chain(candidate)?;

        if let Err(e) = self.persistence.save_chain(&chain.export_chain()) {
            warn!("Failed to persist adopted chain: {}", e);
        }
        Ok(())
    }

    /// Full ordered block sequence for broadcast to peers.
    pub async fn export_chain(&self) -> Vec<Block> {
        self.blockchain.read().await.export_chain()
    }

    pub async fn balance_of(&self, address: &str) -> i64 {
        self.blockchain.read().await.balance_of(address)
    }

    /// Subscribe to mined-block notifications.
    pub async fn subscribe(&self) -> broadcast::Receiver<Block> {
        self.blockchain.read().await.subscribe()
    }

    /// Stop the miner and save the snapshot.
    pub async fn shutdown(&mut self) -> Result<(), ChainError> {
        self.shutdown_flag.store(true, Ordering::Relaxed);
        self.mining_cancel.store(true, Ordering::Relaxed);

        if let Some(handle) = self.miner_task.take() {
            if let Err(e) = handle.await {
                warn!("miner task ended abnormally: {}", e);
            }
        }
        self.mining_cancel.store(false, Ordering::Relaxed);

        let chain = self.blockchain.read().await;
        self.persistence.save_chain(&chain.export_chain())
    }
}
