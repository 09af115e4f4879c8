//! Configuration management for the buy monitor
//!
//! Loads configuration from environment variables (via .env file) and provides
//! validated, type-safe access to all service parameters.

use anyhow::{Context, Result};
use ethers::types::Address;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::types::parse_address;

const UNISWAP_V2_FACTORY: &str = "0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f";
const UNISWAP_V2_ROUTER: &str = "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D";
const WETH_ADDRESS: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";

/// Complete configuration for the buy monitor
#[derive(Debug, Clone)]
pub struct Config {
    pub chain: ChainConfig,
    pub scanner: ScannerConfig,
    pub patterns: PatternConfig,
    pub wallet: WalletConfig,
    pub market: MarketConfig,
    pub telegram: TelegramConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Node endpoint and the contracts every pair is resolved against
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// JSON-RPC endpoint of the Ethereum node
    pub node_url: String,
    pub router: Address,
    pub factory: Address,
    /// Wrapped native token on the quote side of every pair
    pub reference_asset: Address,
    /// Tokens to monitor when the database has none
    pub initial_tokens: Vec<Address>,
    /// Upper bound for any single RPC call (seconds)
    pub rpc_timeout_secs: u64,
}

impl ChainConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

/// What the scanner does with a block the node reports as missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingBlockPolicy {
    /// Hold the high-water mark before the missing block and rescan it next tick
    Retry,
    /// Log it and move past it
    Skip,
}

impl FromStr for MissingBlockPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "retry" => Ok(MissingBlockPolicy::Retry),
            "skip" => Ok(MissingBlockPolicy::Skip),
            other => anyhow::bail!("MISSING_BLOCK_POLICY must be 'retry' or 'skip', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Sleep between ticks (seconds)
    pub poll_interval_secs: u64,
    /// Sleep after a failed tick (seconds)
    pub error_backoff_secs: u64,
    /// Liveness heartbeat period (seconds)
    pub heartbeat_interval_secs: u64,
    pub missing_block_policy: MissingBlockPolicy,
    /// Attempts per missing height before it is skipped under `Retry`
    pub missing_block_max_retries: u32,
    /// Capacity of the scanner -> alert pipeline channel
    pub event_channel_capacity: usize,
    /// How often the monitored set is reloaded from the database (seconds)
    pub token_refresh_secs: u64,
    /// How often stored tokens without a pair are looked up again (seconds)
    pub unresolved_token_retry_secs: u64,
}

/// Pattern detection thresholds
#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// Minimum rise and fall percentage for a pump-and-dump
    pub pump_dump_percent_threshold: f64,
    /// Minimum volume increase percentage at the peak
    pub pump_dump_volume_increase: f64,
    /// Price history window for pump-and-dump (hours)
    pub pump_dump_window_hours: u64,
    /// Buys needed in window before accumulation is considered
    pub accumulation_threshold: usize,
    /// Accumulation window (hours)
    pub accumulation_window_hours: u64,
    /// Buys per wallet to count it as accumulating
    pub accumulation_min_wallet_buys: usize,
    /// Coefficient of variation (percent) below which prices count as stable
    pub accumulation_max_volatility: f64,
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub ethplorer_api_url: String,
    pub ethplorer_api_key: String,
    /// Wallets younger than this many days are fresh
    pub fresh_wallet_threshold_days: i64,
    /// Token sales in 24h that make a wallet a swing trader
    pub swing_trader_threshold: usize,
}

#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub dexscreener_api_url: String,
    /// Reference asset price used when the market lookup fails
    pub reference_price_fallback_usd: f64,
    /// HTTP timeout for market and wallet lookups (seconds)
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat that receives heartbeats
    pub admin_chat_id: i64,
    pub etherscan_tx_url: String,
    pub etherscan_address_url: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub wal_mode: bool,
    pub pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
    pub json_logs: bool,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Expects a .env file in the working directory or environment variables to be set.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        Ok(Config {
            chain: ChainConfig {
                node_url: get_env_string("ETH_NODE_URL", "http://127.0.0.1:8545")?,
                router: get_env_address("UNISWAP_V2_ROUTER", UNISWAP_V2_ROUTER)?,
                factory: get_env_address("UNISWAP_V2_FACTORY", UNISWAP_V2_FACTORY)?,
                reference_asset: get_env_address("WETH_ADDRESS", WETH_ADDRESS)?,
                initial_tokens: parse_token_list(&get_env_string("TOKEN_ADDRESSES", "")?),
                rpc_timeout_secs: get_env_u64("RPC_TIMEOUT_SECS", 15)?,
            },
            scanner: ScannerConfig {
                poll_interval_secs: get_env_u64("POLL_INTERVAL_SECS", 5)?,
                error_backoff_secs: get_env_u64("ERROR_BACKOFF_SECS", 10)?,
                heartbeat_interval_secs: get_env_u64("HEARTBEAT_INTERVAL_SECS", 1800)?,
                missing_block_policy: get_env_string("MISSING_BLOCK_POLICY", "retry")?.parse()?,
                missing_block_max_retries: get_env_u32("MISSING_BLOCK_MAX_RETRIES", 3)?,
                event_channel_capacity: get_env_usize("EVENT_CHANNEL_CAPACITY", 1024)?,
                token_refresh_secs: get_env_u64("TOKEN_REFRESH_SECS", 60)?,
                unresolved_token_retry_secs: get_env_u64("UNRESOLVED_TOKEN_RETRY_SECS", 900)?,
            },
            patterns: PatternConfig {
                pump_dump_percent_threshold: get_env_f64("PUMP_DUMP_PERCENT_THRESHOLD", 20.0)?,
                pump_dump_volume_increase: get_env_f64("PUMP_DUMP_VOLUME_INCREASE", 50.0)?,
                pump_dump_window_hours: get_env_u64("PUMP_DUMP_TIME_WINDOW", 24)?,
                accumulation_threshold: get_env_usize("ACCUMULATION_THRESHOLD", 5)?,
                accumulation_window_hours: get_env_u64("ACCUMULATION_TIME_WINDOW", 48)?,
                accumulation_min_wallet_buys: get_env_usize("ACCUMULATION_MIN_WALLET_BUYS", 3)?,
                accumulation_max_volatility: get_env_f64("ACCUMULATION_MAX_VOLATILITY", 15.0)?,
            },
            wallet: WalletConfig {
                ethplorer_api_url: get_env_string("ETHPLORER_API_URL", "https://api.ethplorer.io")?,
                ethplorer_api_key: get_env_string("ETHPLORER_API_KEY", "freekey")?,
                fresh_wallet_threshold_days: get_env_u64("FRESH_WALLET_THRESHOLD", 30)? as i64,
                swing_trader_threshold: get_env_usize("SWING_TRADER_THRESHOLD", 3)?,
            },
            market: MarketConfig {
                dexscreener_api_url: get_env_string(
                    "DEXSCREENER_API_URL",
                    "https://api.dexscreener.com/latest/dex",
                )?,
                reference_price_fallback_usd: get_env_f64("REFERENCE_PRICE_FALLBACK_USD", 2000.0)?,
                http_timeout_secs: get_env_u64("HTTP_TIMEOUT_SECS", 10)?,
            },
            telegram: TelegramConfig {
                bot_token: get_env_string("TELEGRAM_BOT_TOKEN", "")?,
                admin_chat_id: get_env_i64("ADMIN_USER_ID", 0)?,
                etherscan_tx_url: get_env_string("ETHERSCAN_TX_URL", "https://etherscan.io/tx/")?,
                etherscan_address_url: get_env_string(
                    "ETHERSCAN_ADDRESS_URL",
                    "https://etherscan.io/address/",
                )?,
            },
            database: DatabaseConfig {
                path: PathBuf::from(get_env_string("DATABASE_PATH", "./data/bot_data.db")?),
                wal_mode: get_env_bool("DATABASE_WAL", true)?,
                pool_size: get_env_u32("DATABASE_POOL_SIZE", 4)?,
            },
            logging: LoggingConfig {
                log_level: get_env_string("LOG_LEVEL", "info")?,
                json_logs: get_env_bool("JSON_LOGS", false)?,
            },
        })
    }

    /// Validate configuration values are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.chain.node_url.is_empty() {
            anyhow::bail!("ETH_NODE_URL must be set");
        }
        if self.chain.rpc_timeout_secs == 0 {
            anyhow::bail!("RPC_TIMEOUT_SECS must be > 0");
        }
        if self.scanner.poll_interval_secs == 0 {
            anyhow::bail!("POLL_INTERVAL_SECS must be > 0");
        }
        if self.scanner.heartbeat_interval_secs == 0 {
            anyhow::bail!("HEARTBEAT_INTERVAL_SECS must be > 0");
        }
        if self.scanner.token_refresh_secs == 0 {
            anyhow::bail!("TOKEN_REFRESH_SECS must be > 0");
        }
        if self.scanner.unresolved_token_retry_secs == 0 {
            anyhow::bail!("UNRESOLVED_TOKEN_RETRY_SECS must be > 0");
        }
        if self.scanner.event_channel_capacity == 0 {
            anyhow::bail!("EVENT_CHANNEL_CAPACITY must be > 0");
        }
        if self.patterns.pump_dump_percent_threshold <= 0.0 {
            anyhow::bail!("PUMP_DUMP_PERCENT_THRESHOLD must be > 0");
        }
        if self.patterns.accumulation_threshold == 0 {
            anyhow::bail!("ACCUMULATION_THRESHOLD must be > 0");
        }
        if self.patterns.accumulation_min_wallet_buys == 0 {
            anyhow::bail!("ACCUMULATION_MIN_WALLET_BUYS must be > 0");
        }
        if self.patterns.pump_dump_window_hours == 0 || self.patterns.accumulation_window_hours == 0 {
            anyhow::bail!("Pattern time windows must be > 0 hours");
        }
        if self.market.reference_price_fallback_usd <= 0.0 {
            anyhow::bail!("REFERENCE_PRICE_FALLBACK_USD must be > 0");
        }
        if self.database.pool_size == 0 {
            anyhow::bail!("DATABASE_POOL_SIZE must be > 0");
        }
        if self.telegram.bot_token.is_empty() {
            tracing::warn!("TELEGRAM_BOT_TOKEN is empty - alerts will only be logged");
        }
        if self.chain.initial_tokens.is_empty() {
            tracing::warn!("TOKEN_ADDRESSES is empty - only tokens stored in the database will be monitored");
        }

        Ok(())
    }
}

/// Comma separated addresses; blanks and invalid entries are dropped
pub fn parse_token_list(raw: &str) -> Vec<Address> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| {
            let parsed = parse_address(s);
            if parsed.is_none() {
                tracing::warn!("Ignoring invalid token address in TOKEN_ADDRESSES: {}", s.trim());
            }
            parsed
        })
        .collect()
}

// Helper functions for environment variable parsing

fn get_env_string(key: &str, default: &str) -> Result<String> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn get_env_address(key: &str, default: &str) -> Result<Address> {
    let raw = get_env_string(key, default)?;
    parse_address(&raw).context(format!("Invalid {} value", key))
}

/// Unset means `default`; set but unparsable is an error
fn get_env_parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn get_env_u64(key: &str, default: u64) -> Result<u64> {
    get_env_parsed(key, default)
}

fn get_env_u32(key: &str, default: u32) -> Result<u32> {
    let value = get_env_u64(key, u64::from(default))?;
    u32::try_from(value).with_context(|| format!("{} is out of range: {}", key, value))
}

fn get_env_i64(key: &str, default: i64) -> Result<i64> {
    get_env_parsed(key, default)
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    get_env_parsed(key, default)
}

fn get_env_f64(key: &str, default: f64) -> Result<f64> {
    get_env_parsed(key, default)
}

fn get_env_bool(key: &str, default: bool) -> Result<bool> {
    Ok(match env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    })
}
