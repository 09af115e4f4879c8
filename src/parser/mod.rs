use ethers::abi::RawLog;
use ethers::contract::{EthEvent, EthLogDecode};
use ethers::types::{Address, Log, H256, U256};
use tracing::trace;

use crate::types::{LogPosition, SwapEvent};

/// Uniswap V2 pair `Swap` event
#[derive(Clone, Debug, EthEvent)]
#[ethevent(name = "Swap", abi = "Swap(address,uint256,uint256,uint256,uint256,address)")]
pub struct UniswapV2SwapEvent {
    #[ethevent(indexed)]
    pub sender: Address,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
    #[ethevent(indexed)]
    pub to: Address,
}

/// Decodes pair logs into [`SwapEvent`]s.
///
/// Pair contracts also emit Sync/Mint/Burn/Transfer, so anything that is not
/// a well-formed Swap is `None` rather than an error.
pub struct SwapParser {
    swap_topic: H256,
}

impl Default for SwapParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SwapParser {
    pub fn new() -> Self {
        Self {
            swap_topic: UniswapV2SwapEvent::signature(),
        }
    }

    pub fn swap_topic(&self) -> H256 {
        self.swap_topic
    }

    pub fn parse_log(&self, log: &Log, position: LogPosition) -> Option<SwapEvent> {
        if log.topics.first() != Some(&self.swap_topic) {
            trace!("Skipping non-Swap log from {:?}", log.address);
            return None;
        }

        let raw = RawLog::from(log.clone());
        let event = match <UniswapV2SwapEvent as EthLogDecode>::decode_log(&raw) {
            Ok(event) => event,
            Err(e) => {
                trace!("Malformed Swap log from {:?}: {}", log.address, e);
                return None;
            }
        };

        Some(SwapEvent {
            pair: log.address,
            sender: event.sender,
            amount0_in: event.amount0_in,
            amount1_in: event.amount1_in,
            amount0_out: event.amount0_out,
            amount1_out: event.amount1_out,
            recipient: event.to,
            position,
        })
    }
}

/// Position of `log` in the chain.
///
/// Nodes fill in `log_index`; `fallback_index` (the log's slot in the
/// receipt) is used when they don't.
pub fn log_position(log: &Log, block_number: u64, transaction_index: u64, fallback_index: usize) -> LogPosition {
    LogPosition {
        block_number,
        transaction_index,
        log_index: log
            .log_index
            .map(|i| i.low_u64())
            .unwrap_or(fallback_index as u64),
    }
}
