//! Market data and wallet reputation lookups used to enrich buy alerts.
//!
//! Both are best effort: a failed lookup is logged by the provider and comes
//! back as `None`, and the alert goes out with placeholder values.

pub mod dexscreener;
pub mod ethplorer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use dexscreener::DexScreenerClient;
pub use ethplorer::EthplorerClient;

/// Wallet age reported when the first transaction cannot be found
pub const UNKNOWN_WALLET_AGE_DAYS: i64 = 999;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMarketInfo {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub price_usd: Option<f64>,
    /// Price in the reference asset
    pub price_native: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub market_cap: Option<f64>,
    pub fdv: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub holders: Option<u64>,
    pub dex_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    pub balance: f64,
    pub usd_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: String,
    pub age_days: i64,
    pub is_fresh_wallet: bool,
    /// At most five, largest USD value first
    pub top_holdings: Vec<Holding>,
    pub is_swing_trader: bool,
    pub trading_summary: String,
}

impl WalletInfo {
    /// Placeholder used when the wallet could not be analyzed
    pub fn unknown(address: &str) -> Self {
        Self {
            address: address.to_lowercase(),
            age_days: UNKNOWN_WALLET_AGE_DAYS,
            is_fresh_wallet: false,
            top_holdings: Vec::new(),
            is_swing_trader: false,
            trading_summary: "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenTradingInfo {
    pub token_symbol: String,
    pub trade_count: usize,
    pub buy_count: usize,
    pub sell_count: usize,
    pub bought_amount: f64,
    pub bought_value_usd: f64,
    pub sold_amount: f64,
    pub sold_value_usd: f64,
    pub remaining_tokens: f64,
    pub current_price_usd: f64,
    pub current_value_usd: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_pnl: f64,
    pub pnl_percent: f64,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn token_info(&self, token_address: &str) -> Option<TokenMarketInfo>;

    /// USD price of the reference asset
    async fn reference_price_usd(&self) -> Option<f64>;
}

#[async_trait]
pub trait WalletReputationProvider: Send + Sync {
    async fn wallet_info(&self, wallet_address: &str) -> Option<WalletInfo>;

    async fn token_trading_info(&self, wallet_address: &str, token_address: &str) -> Option<TokenTradingInfo>;
}

/// Numbers arrive as JSON numbers or numeric strings depending on the API
pub(crate) fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
