use async_trait::async_trait;
use ethers::prelude::abigen;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Block, Transaction, TransactionReceipt, H256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use super::{ChainClient, ChainError, ChainResult, PairLookup, TokenMetadata};
use crate::config::ChainConfig;

abigen!(
    UniswapV2Factory,
    r#"[
        function getPair(address tokenA, address tokenB) external view returns (address pair)
    ]"#
);

abigen!(
    Erc20Metadata,
    r#"[
        function name() external view returns (string)
        function symbol() external view returns (string)
        function decimals() external view returns (uint8)
    ]"#
);

/// HTTP JSON-RPC client. Every call is bounded by `timeout` so a stuck node
/// cannot stall the scan loop.
pub struct EthersChainClient {
    provider: Arc<Provider<Http>>,
    factory: Address,
    timeout: Duration,
}

impl EthersChainClient {
    pub fn new(config: &ChainConfig) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(config.node_url.as_str())
            .map_err(|e| anyhow::anyhow!("Invalid ETH_NODE_URL {}: {}", config.node_url, e))?;

        Ok(Self {
            provider: Arc::new(provider),
            factory: config.factory,
            timeout: config.rpc_timeout(),
        })
    }

    /// Confirm the node answers before the scanner starts
    pub async fn connect(&self, max_retries: u32, retry_delay: Duration) -> anyhow::Result<u64> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.timed("eth_chainId", self.provider.get_chainid()).await {
                Ok(chain_id) => {
                    info!("🔗 Connected to Ethereum node (chain id {})", chain_id);
                    return Ok(chain_id.as_u64());
                }
                Err(e) => {
                    if attempts >= max_retries {
                        return Err(anyhow::anyhow!(
                            "Failed to connect after {} attempts: {}",
                            max_retries,
                            e
                        ));
                    }
                    warn!(
                        "⚠️  Connection attempt {}/{} failed: {}. Retrying in {:?}...",
                        attempts, max_retries, e, retry_delay
                    );
                    sleep(retry_delay).await;
                }
            }
        }
    }

    async fn timed<T, E, F>(&self, operation: &'static str, fut: F) -> ChainResult<T>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ChainError::Rpc(format!("{}: {}", operation, e))),
            Err(_) => Err(ChainError::Timeout {
                operation,
                elapsed: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn current_height(&self) -> ChainResult<u64> {
        let height = self
            .timed("eth_blockNumber", self.provider.get_block_number())
            .await?;
        Ok(height.as_u64())
    }

    async fn block_with_transactions(&self, height: u64) -> ChainResult<Block<Transaction>> {
        self.timed("eth_getBlockByNumber", self.provider.get_block_with_txs(height))
            .await?
            .ok_or(ChainError::BlockNotFound(height))
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> ChainResult<TransactionReceipt> {
        self.timed(
            "eth_getTransactionReceipt",
            self.provider.get_transaction_receipt(tx_hash),
        )
        .await?
        .ok_or(ChainError::ReceiptNotFound(tx_hash))
    }
}

#[async_trait]
impl PairLookup for EthersChainClient {
    async fn get_pair(&self, token: Address, reference: Address) -> ChainResult<Address> {
        let factory = UniswapV2Factory::new(self.factory, self.provider.clone());
        let call = factory.get_pair(token, reference);
        self.timed("getPair", call.call()).await
    }

    async fn token_metadata(&self, token: Address) -> ChainResult<TokenMetadata> {
        let erc20 = Erc20Metadata::new(token, self.provider.clone());

        let name_call = erc20.name();
        let symbol_call = erc20.symbol();
        let decimals_call = erc20.decimals();

        let name = self.timed("name", name_call.call()).await?;
        let symbol = self.timed("symbol", symbol_call.call()).await?;
        let decimals = self.timed("decimals", decimals_call.call()).await?;

        Ok(TokenMetadata {
            name,
            symbol,
            decimals,
        })
    }
}
