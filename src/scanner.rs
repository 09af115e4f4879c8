//! Block scanner
//!
//! Polls the node for new blocks, pulls router-bound transactions, decodes
//! Swap logs from registered pairs and emits one [`BuyEvent`] per buy log
//! over the event channel. State is owned by [`Scanner`]; several scanners
//! can run side by side.
//!
//! `last_scanned` only moves past a block once that block has been fully
//! scanned, so a failure at block k leaves it at k-1 and the next tick starts
//! again from k. Rescans are made harmless by the processed-transaction store.

use ethers::types::{Address, Block, Transaction, H256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::chain::{ChainClient, ChainError};
use crate::classifier::{buy_amounts, classify};
use crate::config::{MissingBlockPolicy, ScannerConfig};
use crate::dedup::{DedupCounters, DeduplicationStats, ProcessedStore};
use crate::parser::{log_position, SwapParser};
use crate::registry::PairRegistry;
use crate::types::{address_key, BuyEvent, ScannerEvent, TradeSide};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("processed-transaction store failed: {0}")]
    Store(anyhow::Error),
    #[error("event channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    Running,
    CatchingUp,
    Stopped,
}

/// Outcome of one tick
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub blocks_scanned: u64,
    pub buys_emitted: usize,
    /// Missing heights held back for a later rescan
    pub retrying: Vec<u64>,
    /// Missing heights given up on
    pub skipped: Vec<u64>,
}

/// Cooperative stop flag, checked at the top of every loop iteration
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Scanner {
    chain: Arc<dyn ChainClient>,
    registry: Arc<PairRegistry>,
    processed: Arc<dyn ProcessedStore>,
    dedup: DedupCounters,
    parser: SwapParser,
    router: Address,
    events: mpsc::Sender<ScannerEvent>,
    config: ScannerConfig,
    state: ScannerState,
    last_scanned: Option<u64>,
    missing_attempts: HashMap<u64, u32>,
    last_heartbeat: Option<Instant>,
    running: Arc<AtomicBool>,
}

impl Scanner {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        registry: Arc<PairRegistry>,
        processed: Arc<dyn ProcessedStore>,
        router: Address,
        events: mpsc::Sender<ScannerEvent>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            chain,
            registry,
            processed,
            dedup: DedupCounters::default(),
            parser: SwapParser::new(),
            router,
            events,
            config,
            state: ScannerState::Idle,
            last_scanned: None,
            missing_attempts: HashMap::new(),
            last_heartbeat: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.running.clone())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    pub fn last_scanned(&self) -> Option<u64> {
        self.last_scanned
    }

    pub fn dedup_stats(&self) -> DeduplicationStats {
        self.dedup.stats()
    }

    /// Resume from a known height instead of the chain tip
    pub fn set_last_scanned(&mut self, height: u64) {
        self.last_scanned = Some(height);
    }

    /// Capture the current height as the high-water mark. No backfill.
    pub async fn start(&mut self) -> Result<u64, ScanError> {
        let height = match self.last_scanned {
            Some(height) => height,
            None => self.chain.current_height().await?,
        };
        self.last_scanned = Some(height);
        self.state = ScannerState::Running;
        info!("🚀 Scanner started at block {}", height);
        Ok(height)
    }

    /// Run until stopped or the event channel closes
    pub async fn run(&mut self) {
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        let error_backoff = Duration::from_secs(self.config.error_backoff_secs);

        while self.running.load(Ordering::SeqCst) {
            match self.start().await {
                Ok(_) => break,
                Err(e) => {
                    error!("❌ Failed to read starting block: {}", e);
                    sleep(error_backoff).await;
                }
            }
        }

        if self.running.load(Ordering::SeqCst)
            && self
                .emit_heartbeat("Bot started and listening for swap events".to_string())
                .await
                .is_err()
        {
            self.stop();
        }

        while self.running.load(Ordering::SeqCst) {
            if self.heartbeat_due() {
                let message = format!(
                    "Bot still running. Checked blocks up to {}",
                    self.last_scanned.unwrap_or_default()
                );
                if self.emit_heartbeat(message).await.is_err() {
                    break;
                }
                let stats = self.dedup.stats();
                info!(
                    "💓 Checked blocks up to {:?}: {} buy txs, {:.1}% already processed",
                    self.last_scanned,
                    stats.total_checked,
                    stats.duplicate_rate()
                );
            }

            match self.tick().await {
                Ok(report) => {
                    if report.blocks_scanned > 0 {
                        debug!(
                            "Scanned {} blocks, {} buys, up to {:?}",
                            report.blocks_scanned, report.buys_emitted, self.last_scanned
                        );
                    }
                    sleep(poll_interval).await;
                }
                Err(ScanError::ChannelClosed) => {
                    warn!("⚠️  Event channel closed, stopping scanner");
                    break;
                }
                Err(e) => {
                    error!("❌ Scan tick failed: {}. Backing off {:?}", e, error_backoff);
                    sleep(error_backoff).await;
                }
            }
        }

        self.state = ScannerState::Stopped;
        info!("🛑 Scanner stopped at block {:?}", self.last_scanned);
    }

    fn heartbeat_due(&self) -> bool {
        match self.last_heartbeat {
            Some(at) => at.elapsed() >= Duration::from_secs(self.config.heartbeat_interval_secs),
            None => true,
        }
    }

    async fn emit_heartbeat(&mut self, message: String) -> Result<(), ScanError> {
        self.last_heartbeat = Some(Instant::now());
        debug!("💓 Heartbeat: {}", message);
        self.events
            .send(ScannerEvent::Heartbeat {
                message,
                timestamp: chrono::Utc::now().timestamp(),
            })
            .await
            .map_err(|_| ScanError::ChannelClosed)
    }

    /// Scan everything between the high-water mark and the current height
    pub async fn tick(&mut self) -> Result<TickReport, ScanError> {
        let mut report = TickReport::default();

        let last = match self.last_scanned {
            Some(last) => last,
            None => self.start().await?,
        };
        let height = self.chain.current_height().await?;
        if height <= last {
            return Ok(report);
        }

        self.state = ScannerState::CatchingUp;
        trace!("Checking blocks {} to {}", last + 1, height);

        // First height held back under MissingBlockPolicy::Retry
        let mut held: Option<u64> = None;

        for number in (last + 1)..=height {
            match self.scan_block(number).await {
                Ok(buys) => {
                    report.blocks_scanned += 1;
                    report.buys_emitted += buys;
                    self.missing_attempts.remove(&number);
                }
                Err(ScanError::Chain(e)) if e.is_missing_block() => {
                    if self.hold_missing_block(number) {
                        held.get_or_insert(number);
                        report.retrying.push(number);
                    } else {
                        report.skipped.push(number);
                    }
                }
                Err(e) => {
                    self.state = ScannerState::Running;
                    return Err(e);
                }
            }

            if held.is_none() {
                self.last_scanned = Some(number);
            }
        }

        self.state = ScannerState::Running;
        Ok(report)
    }

    /// Whether a missing block should be rescanned on a later tick
    fn hold_missing_block(&mut self, number: u64) -> bool {
        match self.config.missing_block_policy {
            MissingBlockPolicy::Skip => {
                warn!("⚠️  Block {} not found, skipping", number);
                false
            }
            MissingBlockPolicy::Retry => {
                let attempts = self.missing_attempts.entry(number).or_insert(0);
                *attempts += 1;

                if *attempts >= self.config.missing_block_max_retries {
                    warn!(
                        "⚠️  Block {} still missing after {} attempts, skipping",
                        number, attempts
                    );
                    self.missing_attempts.remove(&number);
                    false
                } else {
                    warn!(
                        "⚠️  Block {} not found (attempt {}/{}), will rescan",
                        number, attempts, self.config.missing_block_max_retries
                    );
                    true
                }
            }
        }
    }

    /// Scan one block; returns the number of buys emitted
    pub async fn scan_block(&self, number: u64) -> Result<usize, ScanError> {
        let pairs = self.registry.snapshot();
        if pairs.is_empty() {
            return Ok(0);
        }

        let block = self.chain.block_with_transactions(number).await?;
        let timestamp = block.timestamp.low_u64() as i64;
        let mut emitted = 0;

        for (position, tx) in router_transactions(&block, self.router) {
            let receipt = self.chain.transaction_receipt(tx.hash).await?;
            if receipt.status.map(|s| s.is_zero()).unwrap_or(false) {
                trace!("Skipping reverted transaction {:?}", tx.hash);
                continue;
            }

            let mut buys = Vec::new();
            for (log_slot, log) in receipt.logs.iter().enumerate() {
                let Some(pair) = pairs.get(&log.address) else {
                    continue;
                };
                let Some(swap) = self
                    .parser
                    .parse_log(log, log_position(log, number, position, log_slot))
                else {
                    continue;
                };

                let side = classify(&swap, pair.reference_side);
                let Some((reference_amount, token_amount)) =
                    buy_amounts(&swap, pair.reference_side, pair.token_decimals)
                else {
                    trace!("{} swap on {} ignored", side.as_str(), pair.token_symbol);
                    continue;
                };
                debug_assert_eq!(side, TradeSide::Buy);

                buys.push(BuyEvent {
                    tx_hash: tx_key(&tx.hash),
                    buyer: address_key(&tx.from),
                    token_address: address_key(&pair.token_address),
                    token_name: pair.token_name.clone(),
                    token_symbol: pair.token_symbol.clone(),
                    pair_address: address_key(&pair.pair_address),
                    reference_amount,
                    token_amount,
                    timestamp,
                    block_number: swap.position.block_number,
                    transaction_index: swap.position.transaction_index,
                    log_index: swap.position.log_index,
                    patterns: Vec::new(),
                });
            }

            if buys.is_empty() {
                continue;
            }

            // One marker per transaction covers every buy log it carries
            let tx_hash = tx_key(&tx.hash);
            let is_new = self
                .processed
                .check_and_mark(&tx_hash)
                .map_err(ScanError::Store)?;
            self.dedup.record(is_new);
            if !is_new {
                debug!("Transaction {} already processed", tx_hash);
                continue;
            }

            for buy in buys {
                info!(
                    "🟢 BUY {} {:.4} ETH -> {:.2} {} (block {}, tx {})",
                    buy.buyer,
                    buy.reference_amount,
                    buy.token_amount,
                    buy.token_symbol,
                    buy.block_number,
                    buy.tx_hash
                );
                self.events
                    .send(ScannerEvent::Buy(buy))
                    .await
                    .map_err(|_| ScanError::ChannelClosed)?;
                emitted += 1;
            }
        }

        Ok(emitted)
    }
}

/// Router-bound transactions in canonical order with their index
fn router_transactions(block: &Block<Transaction>, router: Address) -> Vec<(u64, &Transaction)> {
    let mut txs: Vec<(u64, &Transaction)> = block
        .transactions
        .iter()
        .enumerate()
        .map(|(i, tx)| (tx.transaction_index.map(|idx| idx.as_u64()).unwrap_or(i as u64), tx))
        .filter(|(_, tx)| tx.to == Some(router))
        .collect();
    txs.sort_by_key(|(index, _)| *index);
    txs
}

fn tx_key(hash: &H256) -> String {
    format!("{:?}", hash)
}
