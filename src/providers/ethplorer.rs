//! Ethplorer-backed wallet analysis
//!
//! Wallet age comes from the first transaction, holdings from
//! `getAddressInfo`, and swing-trading behaviour from transfers sent out of
//! the wallet in the last 24 hours.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    value_f64, Holding, TokenTradingInfo, WalletInfo, WalletReputationProvider, UNKNOWN_WALLET_AGE_DAYS,
};
use crate::config::WalletConfig;

/// Holdings worth less than this are ignored
const MIN_HOLDING_USD: f64 = 10.0;
const MAX_HOLDINGS: usize = 5;
const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Deserialize)]
struct AddressInfo {
    address: Option<String>,
    #[serde(rename = "ETH")]
    eth: Option<EthSummary>,
    #[serde(rename = "countTxs")]
    count_txs: Option<u64>,
    #[serde(default)]
    tokens: Vec<TokenBalance>,
}

#[derive(Debug, Deserialize)]
struct EthSummary {
    #[serde(rename = "transfersCount")]
    transfers_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenBalance {
    #[serde(rename = "tokenInfo")]
    token_info: TokenInfo,
    #[serde(default)]
    balance: Value,
}

#[derive(Debug, Default, Deserialize)]
struct TokenInfo {
    name: Option<String>,
    symbol: Option<String>,
    #[serde(default)]
    decimals: Value,
    /// `false` when Ethplorer has no price
    #[serde(default)]
    price: Value,
}

impl TokenInfo {
    fn decimals(&self) -> i32 {
        value_f64(&self.decimals).map(|d| d as i32).unwrap_or(18)
    }

    fn price_usd(&self) -> f64 {
        self.price.get("rate").and_then(value_f64).unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
struct AddressTransaction {
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct AddressHistory {
    operations: Option<Vec<Operation>>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    timestamp: i64,
    from: Option<String>,
    to: Option<String>,
    #[serde(default)]
    value: Value,
    #[serde(rename = "tokenInfo")]
    token_info: Option<TokenInfo>,
    #[serde(rename = "usdPrice", default)]
    usd_price: Value,
}

pub struct EthplorerClient {
    client: Client,
    api_url: String,
    api_key: String,
    fresh_wallet_threshold_days: i64,
    swing_trader_threshold: usize,
}

impl EthplorerClient {
    pub fn new(config: &WalletConfig, http_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .build()
            .context("Failed to build Ethplorer HTTP client")?;

        Ok(Self {
            client,
            api_url: config.ethplorer_api_url.trim_end_matches('/').to_string(),
            api_key: config.ethplorer_api_key.clone(),
            fresh_wallet_threshold_days: config.fresh_wallet_threshold_days,
            swing_trader_threshold: config.swing_trader_threshold,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{}", self.api_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .with_context(|| format!("Ethplorer request failed: {}", path))?;

        if !response.status().is_success() {
            anyhow::bail!("Ethplorer returned {} for {}", response.status(), path);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to decode Ethplorer response for {}", path))
    }

    async fn analyze_wallet(&self, wallet: &str) -> Result<WalletInfo> {
        let info: AddressInfo = self.get(&format!("getAddressInfo/{}", wallet), &[]).await?;
        let now = chrono::Utc::now().timestamp();

        let age_days = match self.wallet_age_days(wallet, &info, now).await {
            Ok(days) => days,
            Err(e) => {
                debug!("Wallet age unavailable for {}: {:#}", wallet, e);
                UNKNOWN_WALLET_AGE_DAYS
            }
        };

        let (is_swing_trader, trading_summary) = match self
            .get::<AddressHistory>(
                &format!("getAddressHistory/{}", wallet),
                &[("type", "transfer"), ("limit", "50")],
            )
            .await
        {
            Ok(history) => match history.operations {
                Some(ops) => swing_behaviour(wallet, &ops, now, self.swing_trader_threshold),
                None => (false, "No recent transactions".to_string()),
            },
            Err(e) => {
                debug!("Trading history unavailable for {}: {:#}", wallet, e);
                (false, "Could not analyze trading behavior".to_string())
            }
        };

        Ok(WalletInfo {
            address: wallet.to_lowercase(),
            age_days,
            is_fresh_wallet: age_days < self.fresh_wallet_threshold_days,
            top_holdings: top_holdings(&info.tokens),
            is_swing_trader,
            trading_summary,
        })
    }

    async fn wallet_age_days(&self, wallet: &str, info: &AddressInfo, now: i64) -> Result<i64> {
        let has_activity = info.eth.as_ref().and_then(|e| e.transfers_count).unwrap_or(0) > 0
            || info.count_txs.unwrap_or(0) > 0;
        if !has_activity {
            return Ok(UNKNOWN_WALLET_AGE_DAYS);
        }

        let address = info.address.as_deref().unwrap_or(wallet);
        let txs: Vec<AddressTransaction> = self
            .get(
                &format!("getAddressTransactions/{}", address),
                &[("limit", "1"), ("sort", "asc")],
            )
            .await?;

        Ok(txs
            .first()
            .map(|tx| (now - tx.timestamp).max(0) / SECS_PER_DAY)
            .unwrap_or(UNKNOWN_WALLET_AGE_DAYS))
    }

    async fn trading_info(&self, wallet: &str, token: &str) -> Result<TokenTradingInfo> {
        let history: AddressHistory = self
            .get(
                &format!("getAddressHistory/{}", wallet),
                &[("token", token), ("type", "transfer"), ("limit", "100")],
            )
            .await?;

        let Some(ops) = history.operations else {
            return Ok(TokenTradingInfo::default());
        };

        let current_price = match self.get::<TokenInfo>(&format!("getTokenInfo/{}", token), &[]).await {
            Ok(info) => info.price_usd(),
            Err(e) => {
                debug!("Current price unavailable for {}: {:#}", token, e);
                0.0
            }
        };

        Ok(compute_trading_info(wallet, &ops, current_price))
    }
}

#[async_trait]
impl WalletReputationProvider for EthplorerClient {
    async fn wallet_info(&self, wallet_address: &str) -> Option<WalletInfo> {
        match self.analyze_wallet(wallet_address).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("⚠️  Wallet analysis failed for {}: {:#}", wallet_address, e);
                None
            }
        }
    }

    async fn token_trading_info(&self, wallet_address: &str, token_address: &str) -> Option<TokenTradingInfo> {
        match self.trading_info(wallet_address, token_address).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(
                    "⚠️  Token trading info failed for {} on {}: {:#}",
                    wallet_address, token_address, e
                );
                None
            }
        }
    }
}

fn top_holdings(tokens: &[TokenBalance]) -> Vec<Holding> {
    let mut holdings: Vec<Holding> = tokens
        .iter()
        .filter_map(|t| {
            let info = &t.token_info;
            let symbol = info.symbol.clone().filter(|s| !s.is_empty())?;
            let name = info.name.clone().filter(|s| !s.is_empty())?;

            let balance = value_f64(&t.balance).unwrap_or(0.0) / 10f64.powi(info.decimals());
            let usd_value = balance * info.price_usd();

            (usd_value > MIN_HOLDING_USD).then(|| Holding {
                symbol,
                name,
                balance,
                usd_value,
            })
        })
        .collect();

    holdings.sort_by(|a, b| b.usd_value.total_cmp(&a.usd_value));
    holdings.truncate(MAX_HOLDINGS);
    holdings
}

/// Transfers out of the wallet in the last 24h
fn swing_behaviour(wallet: &str, ops: &[Operation], now: i64, threshold: usize) -> (bool, String) {
    let wallet = wallet.to_lowercase();
    let since = now - SECS_PER_DAY;

    let recent_sells = ops
        .iter()
        .filter(|op| op.timestamp >= since)
        .filter(|op| op.from.as_deref().map(str::to_lowercase).as_deref() == Some(wallet.as_str()))
        .count();

    (
        recent_sells >= threshold,
        format!("Sold {} tokens in last 24h", recent_sells),
    )
}

fn compute_trading_info(wallet: &str, ops: &[Operation], current_price: f64) -> TokenTradingInfo {
    let wallet = wallet.to_lowercase();
    let mut info = TokenTradingInfo {
        token_symbol: "Unknown".to_string(),
        current_price_usd: current_price,
        ..Default::default()
    };

    let mut decimals = 18;
    for op in ops {
        if let Some(token) = &op.token_info {
            decimals = token.decimals();
            if let Some(symbol) = &token.symbol {
                info.token_symbol = symbol.clone();
            }
        }

        let amount = value_f64(&op.value).unwrap_or(0.0) / 10f64.powi(decimals);
        let price = value_f64(&op.usd_price).unwrap_or(0.0);
        let is_wallet = |addr: &Option<String>| addr.as_deref().map(str::to_lowercase).as_deref() == Some(wallet.as_str());

        if is_wallet(&op.to) {
            info.buy_count += 1;
            info.bought_amount += amount;
            info.bought_value_usd += amount * price;
        } else if is_wallet(&op.from) {
            info.sell_count += 1;
            info.sold_amount += amount;
            info.sold_value_usd += amount * price;
        }
    }

    info.trade_count = info.buy_count + info.sell_count;
    info.remaining_tokens = info.bought_amount - info.sold_amount;
    info.current_value_usd = info.remaining_tokens * current_price;

    let (bought_amount, bought_value) = (info.bought_amount, info.bought_value_usd);
    let cost_share = |amount: f64| {
        if bought_amount > 0.0 {
            amount / bought_amount * bought_value
        } else {
            0.0
        }
    };
    info.realized_pnl = info.sold_value_usd - cost_share(info.sold_amount);
    info.unrealized_pnl = info.current_value_usd - cost_share(info.remaining_tokens);
    info.total_pnl = info.realized_pnl + info.unrealized_pnl;
    info.pnl_percent = if info.bought_value_usd > 0.0 {
        info.total_pnl / info.bought_value_usd * 100.0
    } else {
        0.0
    };

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "0xAbCd000000000000000000000000000000000001";

    #[test]
    fn test_top_holdings_filters_sorts_and_caps() {
        let info: AddressInfo = serde_json::from_str(
            r#"{
                "address": "0xabcd000000000000000000000000000000000001",
                "ETH": {"balance": 1.2, "transfersCount": 4},
                "tokens": [
                    {"tokenInfo": {"name": "Dust", "symbol": "DST", "decimals": "18", "price": {"rate": 0.001}}, "balance": 1e18},
                    {"tokenInfo": {"name": "Tether", "symbol": "USDT", "decimals": "6", "price": {"rate": 1.0}}, "balance": 500000000},
                    {"tokenInfo": {"name": "NoPrice", "symbol": "NOP", "decimals": "18", "price": false}, "balance": 5e21},
                    {"tokenInfo": {"name": "", "symbol": "ANON", "decimals": 18, "price": {"rate": 5}}, "balance": 1e20},
                    {"tokenInfo": {"name": "Chainlink", "symbol": "LINK", "decimals": 18, "price": {"rate": "15.5"}}, "balance": 1e20},
                    {"tokenInfo": {"name": "A", "symbol": "A", "decimals": 0, "price": {"rate": 20}}, "balance": 1},
                    {"tokenInfo": {"name": "B", "symbol": "B", "decimals": 0, "price": {"rate": 30}}, "balance": 1},
                    {"tokenInfo": {"name": "C", "symbol": "C", "decimals": 0, "price": {"rate": 40}}, "balance": 1},
                    {"tokenInfo": {"name": "D", "symbol": "D", "decimals": 0, "price": {"rate": 11}}, "balance": 1}
                ]
            }"#,
        )
        .unwrap();

        let holdings = top_holdings(&info.tokens);
        let symbols: Vec<&str> = holdings.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["LINK", "USDT", "C", "B", "A"]);
        assert!((holdings[0].usd_value - 1550.0).abs() < 1e-6);
    }

    #[test]
    fn test_swing_behaviour_counts_recent_outgoing() {
        let now = 1_700_000_000;
        let ops: Vec<Operation> = serde_json::from_value(serde_json::json!([
            {"timestamp": now - 100, "from": WALLET.to_lowercase(), "to": "0x2", "value": "1"},
            {"timestamp": now - 200, "from": WALLET.to_lowercase(), "to": "0x3", "value": "1"},
            {"timestamp": now - 300, "from": "0x4", "to": WALLET.to_lowercase(), "value": "1"},
            {"timestamp": now - 90_000, "from": WALLET.to_lowercase(), "to": "0x5", "value": "1"},
            {"timestamp": now - 400, "from": WALLET.to_lowercase(), "to": "0x6", "value": "1"}
        ]))
        .unwrap();

        let (swing, summary) = swing_behaviour(WALLET, &ops, now, 3);
        assert!(swing);
        assert_eq!(summary, "Sold 3 tokens in last 24h");

        let (swing, _) = swing_behaviour(WALLET, &ops, now, 4);
        assert!(!swing);
    }

    #[test]
    fn test_compute_trading_info_pnl() {
        let wallet = WALLET.to_lowercase();
        let ops: Vec<Operation> = serde_json::from_value(serde_json::json!([
            {"timestamp": 1, "from": "0xpool", "to": wallet, "value": "100000000000000000000",
             "usdPrice": 1.0, "tokenInfo": {"symbol": "TKN", "decimals": "18"}},
            {"timestamp": 2, "from": wallet, "to": "0xpool", "value": "40000000000000000000",
             "usdPrice": 2.0, "tokenInfo": {"symbol": "TKN", "decimals": "18"}}
        ]))
        .unwrap();

        let info = compute_trading_info(WALLET, &ops, 3.0);
        assert_eq!(info.token_symbol, "TKN");
        assert_eq!(info.trade_count, 2);
        assert_eq!(info.buy_count, 1);
        assert_eq!(info.sell_count, 1);
        assert!((info.bought_value_usd - 100.0).abs() < 1e-9);
        assert!((info.sold_value_usd - 80.0).abs() < 1e-9);
        assert!((info.remaining_tokens - 60.0).abs() < 1e-9);
        // realized: 80 - 40, unrealized: 180 - 60
        assert!((info.realized_pnl - 40.0).abs() < 1e-9);
        assert!((info.unrealized_pnl - 120.0).abs() < 1e-9);
        assert!((info.pnl_percent - 160.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_trading_info_without_history() {
        let info = compute_trading_info(WALLET, &[], 1.0);
        assert_eq!(info.trade_count, 0);
        assert_eq!(info.pnl_percent, 0.0);
        assert_eq!(info.token_symbol, "Unknown");
    }
}
