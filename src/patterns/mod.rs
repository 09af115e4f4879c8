//! Trading pattern detection
//!
//! The detectors are pure functions over a price series (and, for
//! accumulation, a buy window). [`PatternEngine`] wires them to the database
//! and the in-memory [`BuyWindow`].

pub mod accumulation;
pub mod buy_window;
pub mod pump_dump;

use anyhow::Result;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::PatternConfig;
use crate::db::Database;
use crate::types::{BuyEvent, TradingPattern};

pub use accumulation::{detect_accumulation, AccumulationSignal};
pub use buy_window::{BuyWindow, WindowBuy};
pub use pump_dump::{detect_pump_dump, PumpDumpSignal};

pub struct PatternEngine {
    db: Database,
    window: Mutex<BuyWindow>,
    config: PatternConfig,
}

impl PatternEngine {
    pub fn new(db: Database, config: PatternConfig) -> Self {
        let window_secs = (config.accumulation_window_hours as i64) * 3600;
        Self {
            db,
            window: Mutex::new(BuyWindow::new(window_secs)),
            config,
        }
    }

    /// Feed a buy into the accumulation window
    pub fn record_buy(&self, event: &BuyEvent) {
        match self.window.lock() {
            Ok(mut window) => window.record(event),
            Err(poisoned) => poisoned.into_inner().record(event),
        }
    }

    /// Run both detectors for `token` as of `now`. Nothing is persisted.
    pub fn detect(&self, token: &str, now: i64) -> Result<Vec<TradingPattern>> {
        let mut patterns = Vec::new();

        let pump_since = now - (self.config.pump_dump_window_hours as i64) * 3600;
        let series = self.db.price_history_since(token, pump_since)?;
        if let Some(signal) = detect_pump_dump(&series, &self.config) {
            info!(
                "🚨 Pump & dump on {}: +{:.1}% / -{:.1}%, volume +{:.0}%",
                token, signal.pump_percent, signal.dump_percent, signal.volume_increase
            );
            patterns.push(signal.to_pattern(token, now));
        }

        let accumulation_since = now - (self.config.accumulation_window_hours as i64) * 3600;
        let buys = match self.window.lock() {
            Ok(window) => window.buys_since(token, accumulation_since),
            Err(poisoned) => poisoned.into_inner().buys_since(token, accumulation_since),
        };
        if buys.len() >= self.config.accumulation_threshold {
            let series = self.db.price_history_since(token, accumulation_since)?;
            if let Some(signal) = detect_accumulation(&buys, &series, &self.config) {
                info!(
                    "🐋 Accumulation on {}: {} wallets, volatility {:.1}%",
                    token,
                    signal.wallets.len(),
                    signal.volatility
                );
                patterns.push(signal.to_pattern(token, now));
            }
        }

        Ok(patterns)
    }

    /// Detect and append every detection to the pattern log
    pub fn detect_and_store(&self, token: &str, now: i64) -> Result<Vec<TradingPattern>> {
        let patterns = self.detect(token, now)?;
        for pattern in &patterns {
            if let Err(e) = self.db.append_pattern(pattern) {
                warn!("⚠️  Failed to store {} pattern for {}: {}", pattern.pattern_type, token, e);
            }
        }
        Ok(patterns)
    }

    /// Forget buy windows of tokens no longer monitored
    pub fn retain_tokens(&self, tokens: &[String]) {
        match self.window.lock() {
            Ok(mut window) => window.retain_tokens(tokens),
            Err(poisoned) => poisoned.into_inner().retain_tokens(tokens),
        }
    }

    /// Buys currently held in the window for `token`
    pub fn buffered_buys(&self, token: &str) -> usize {
        match self.window.lock() {
            Ok(window) => window.len(token),
            Err(poisoned) => poisoned.into_inner().len(token),
        }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }
}
