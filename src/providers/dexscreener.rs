use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{value_f64, MarketDataProvider, TokenMarketInfo};
use crate::config::MarketConfig;
use crate::types::address_key;

#[derive(Debug, Deserialize)]
struct TokensResponse {
    #[serde(default)]
    pairs: Option<Vec<DexPair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DexPair {
    pair_address: Option<String>,
    base_token: Option<DexToken>,
    quote_token: Option<DexToken>,
    #[serde(default)]
    price_usd: Value,
    #[serde(default)]
    price_native: Value,
    liquidity: Option<DexLiquidity>,
    volume: Option<DexVolume>,
    #[serde(default)]
    fdv: Value,
    #[serde(default)]
    market_cap: Value,
}

#[derive(Debug, Deserialize)]
struct DexToken {
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DexLiquidity {
    #[serde(default)]
    usd: Value,
}

#[derive(Debug, Deserialize)]
struct DexVolume {
    #[serde(default)]
    h24: Value,
}

/// DexScreener public API client
pub struct DexScreenerClient {
    client: Client,
    api_url: String,
    reference_asset: String,
}

impl DexScreenerClient {
    pub fn new(config: &MarketConfig, reference_asset: &ethers::types::Address) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("Failed to build DexScreener HTTP client")?;

        Ok(Self {
            client,
            api_url: config.dexscreener_api_url.trim_end_matches('/').to_string(),
            reference_asset: address_key(reference_asset),
        })
    }

    async fn fetch_pairs(&self, url: &str) -> Result<Vec<DexPair>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("DexScreener request failed: {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("DexScreener returned {} for {}", response.status(), url);
        }

        let body: TokensResponse = response
            .json()
            .await
            .context("Failed to decode DexScreener response")?;
        Ok(body.pairs.unwrap_or_default())
    }
}

#[async_trait]
impl MarketDataProvider for DexScreenerClient {
    async fn token_info(&self, token_address: &str) -> Option<TokenMarketInfo> {
        let url = format!("{}/tokens/{}", self.api_url, token_address);
        match self.fetch_pairs(&url).await {
            Ok(pairs) => {
                let info = market_info(&pairs);
                if info.is_none() {
                    debug!("No DexScreener pairs for {}", token_address);
                }
                info
            }
            Err(e) => {
                warn!("⚠️  Token info lookup failed for {}: {:#}", token_address, e);
                None
            }
        }
    }

    async fn reference_price_usd(&self) -> Option<f64> {
        let url = format!("{}/tokens/{}", self.api_url, self.reference_asset);
        match self.fetch_pairs(&url).await {
            Ok(pairs) => stablecoin_price(&pairs),
            Err(e) => {
                warn!("⚠️  ETH price lookup failed: {:#}", e);
                None
            }
        }
    }
}

/// The first pair is the most liquid one
fn market_info(pairs: &[DexPair]) -> Option<TokenMarketInfo> {
    let pair = pairs.first()?;
    let base = pair.base_token.as_ref();

    Some(TokenMarketInfo {
        name: base.and_then(|t| t.name.clone()),
        symbol: base.and_then(|t| t.symbol.clone()),
        price_usd: value_f64(&pair.price_usd),
        price_native: value_f64(&pair.price_native),
        liquidity_usd: pair.liquidity.as_ref().and_then(|l| value_f64(&l.usd)),
        market_cap: value_f64(&pair.market_cap),
        fdv: value_f64(&pair.fdv),
        volume_24h_usd: pair.volume.as_ref().and_then(|v| value_f64(&v.h24)),
        holders: None,
        dex_url: pair
            .pair_address
            .as_ref()
            .map(|p| format!("https://dexscreener.com/ethereum/{}", p)),
    })
}

/// Prefer a USDC/USDT quoted pair, else the first pair
fn stablecoin_price(pairs: &[DexPair]) -> Option<f64> {
    pairs
        .iter()
        .find(|p| {
            p.quote_token
                .as_ref()
                .and_then(|t| t.symbol.as_deref())
                .map_or(false, |s| s == "USDC" || s == "USDT")
        })
        .or_else(|| pairs.first())
        .and_then(|p| value_f64(&p.price_usd))
}
