use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowercase `0x`-prefixed hex key for an address.
///
/// `Display` on `H160` abbreviates the middle of the address, so every key
/// that ends up in the database or in a map goes through `Debug` instead.
pub fn address_key(address: &Address) -> String {
    format!("{:?}", address)
}

/// Parse a user/config supplied address, accepting any hex casing.
pub fn parse_address(raw: &str) -> Option<Address> {
    let trimmed = raw.trim();
    if trimmed.len() != 42 || !trimmed.starts_with("0x") {
        return None;
    }
    Address::from_str(&trimmed.to_lowercase()).ok()
}

/// A token the monitor watches. Identity is the lowercased address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoredToken {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Which slot of a pair holds the reference asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairSide {
    Token0,
    Token1,
}

impl PairSide {
    /// Uniswap V2 orders a pair's tokens by address, smaller first.
    pub fn of_reference(reference: &Address, token: &Address) -> Self {
        if reference < token {
            PairSide::Token0
        } else {
            PairSide::Token1
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairInfo {
    pub pair_address: Address,
    pub token_address: Address,
    pub token_name: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub reference_side: PairSide,
}

impl PairInfo {
    pub fn monitored_token(&self) -> MonitoredToken {
        MonitoredToken {
            address: address_key(&self.token_address),
            name: self.token_name.clone(),
            symbol: self.token_symbol.clone(),
            decimals: self.token_decimals,
        }
    }
}

/// Position of a log inside the chain, used for deterministic ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct LogPosition {
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
}

/// Raw decoded Uniswap V2 `Swap` log
#[derive(Debug, Clone, PartialEq)]
pub struct SwapEvent {
    pub pair: Address,
    pub sender: Address,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
    pub recipient: Address,
    pub position: LogPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
    Ambiguous,
}

impl TradeSide {
    pub fn as_str(&self) -> &str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
            TradeSide::Ambiguous => "ambiguous",
        }
    }
}

/// Canonical buy detected on chain.
///
/// Constructed once by the scanner. `with_patterns` returns a new value
/// rather than mutating the original.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuyEvent {
    pub tx_hash: String,
    pub buyer: String,
    pub token_address: String,
    pub token_name: String,
    pub token_symbol: String,
    pub pair_address: String,
    pub reference_amount: f64,
    pub token_amount: f64,
    pub timestamp: i64,
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
    pub patterns: Vec<TradingPattern>,
}

impl BuyEvent {
    pub fn position(&self) -> LogPosition {
        LogPosition {
            block_number: self.block_number,
            transaction_index: self.transaction_index,
            log_index: self.log_index,
        }
    }

    pub fn with_patterns(&self, patterns: Vec<TradingPattern>) -> Self {
        Self {
            patterns,
            ..self.clone()
        }
    }
}

/// Everything the scanner hands downstream
#[derive(Debug, Clone)]
pub enum ScannerEvent {
    Buy(BuyEvent),
    Heartbeat { message: String, timestamp: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: i64,
    pub price_usd: f64,
    pub volume_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternType {
    PumpDump,
    Accumulation,
}

impl PatternType {
    pub fn as_str(&self) -> &str {
        match self {
            PatternType::PumpDump => "pump_dump",
            PatternType::Accumulation => "accumulation",
        }
    }
}

impl FromStr for PatternType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pump_dump" => Ok(PatternType::PumpDump),
            "accumulation" => Ok(PatternType::Accumulation),
            other => Err(anyhow::anyhow!("Unknown pattern type: {}", other)),
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingPattern {
    pub token_address: String,
    pub pattern_type: PatternType,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub start_price: f64,
    pub end_price: f64,
    pub percent_change: f64,
    pub volume_change: f64,
    pub wallet_count: u32,
    pub detected_at: i64,
}

/// A chat that receives buy alerts
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSubscription {
    pub chat_id: i64,
    pub title: String,
    pub registered_by: i64,
    pub registered_at: i64,
}
