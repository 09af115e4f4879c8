//! Chain access used by the scanner and the pair registry.
//!
//! The scanner only ever talks to the node through [`ChainClient`] and the
//! registry through [`PairLookup`], so tests can drive both with in-memory
//! fixtures.

pub mod rpc;

use async_trait::async_trait;
use ethers::types::{Address, Block, Transaction, TransactionReceipt, H256};
use std::time::Duration;
use thiserror::Error;

pub use rpc::EthersChainClient;

#[derive(Debug, Error)]
pub enum ChainError {
    /// The node has no block at this height (yet, or any more)
    #[error("block {0} not found")]
    BlockNotFound(u64),
    #[error("receipt for transaction {0:?} not found")]
    ReceiptNotFound(H256),
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl ChainError {
    pub fn is_missing_block(&self) -> bool {
        matches!(self, ChainError::BlockNotFound(_))
    }
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Read-only block access
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_height(&self) -> ChainResult<u64>;

    async fn block_with_transactions(&self, height: u64) -> ChainResult<Block<Transaction>>;

    async fn transaction_receipt(&self, tx_hash: H256) -> ChainResult<TransactionReceipt>;
}

/// Token metadata returned by the ERC-20 read calls
#[derive(Debug, Clone, PartialEq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Factory and ERC-20 lookups needed to build the pair registry
#[async_trait]
pub trait PairLookup: Send + Sync {
    /// Pair address for (token, reference); the zero address when none exists
    async fn get_pair(&self, token: Address, reference: Address) -> ChainResult<Address>;

    async fn token_metadata(&self, token: Address) -> ChainResult<TokenMetadata>;
}
