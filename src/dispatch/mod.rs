//! Alert pipeline
//!
//! Consumes [`ScannerEvent`]s from the scanner channel. Every buy is fed to
//! the pattern engine, enriched with market and wallet data, formatted and
//! sent to every registered group. Heartbeats only go to the admin chat.
//! Enrichment failures never drop a buy.

pub mod format;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{MarketConfig, TelegramConfig};
use crate::db::{now_unix, Database};
use crate::patterns::PatternEngine;
use crate::providers::{MarketDataProvider, WalletInfo, WalletReputationProvider};
use crate::types::{BuyEvent, PricePoint, ScannerEvent, TradingPattern};

pub use format::{format_buy_alert, format_heartbeat, format_number, AlertContext};
pub use telegram::{LogNotifier, TelegramNotifier};

/// Outbound message channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn send_admin(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    pub patterns: Vec<TradingPattern>,
    /// Groups the alert reached
    pub delivered: usize,
    pub failed: usize,
}

pub struct AlertPipeline {
    db: Database,
    patterns: Arc<PatternEngine>,
    market: Arc<dyn MarketDataProvider>,
    wallets: Arc<dyn WalletReputationProvider>,
    notifier: Arc<dyn Notifier>,
    links: TelegramConfig,
    reference_price_fallback_usd: f64,
}

impl AlertPipeline {
    pub fn new(
        db: Database,
        patterns: Arc<PatternEngine>,
        market: Arc<dyn MarketDataProvider>,
        wallets: Arc<dyn WalletReputationProvider>,
        notifier: Arc<dyn Notifier>,
        links: TelegramConfig,
        market_config: &MarketConfig,
    ) -> Self {
        Self {
            db,
            patterns,
            market,
            wallets,
            notifier,
            links,
            reference_price_fallback_usd: market_config.reference_price_fallback_usd,
        }
    }

    /// Drain the scanner channel until every sender is gone
    pub async fn run(&self, mut events: mpsc::Receiver<ScannerEvent>) {
        info!("📬 Alert pipeline started");

        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event).await {
                error!("❌ Failed to dispatch event: {:#}", e);
            }
        }

        info!("📭 Alert pipeline stopped (channel closed)");
    }

    pub async fn handle(&self, event: ScannerEvent) -> Result<DispatchReport> {
        match event {
            ScannerEvent::Heartbeat { message, .. } => {
                self.notifier.send_admin(&format_heartbeat(&message)).await?;
                Ok(DispatchReport::default())
            }
            ScannerEvent::Buy(buy) => self.dispatch_buy(buy).await,
        }
    }

    pub async fn dispatch_buy(&self, event: BuyEvent) -> Result<DispatchReport> {
        let token = event.token_address.clone();
        self.patterns.record_buy(&event);
        debug!(
            "Buy window for {} holds {} buys",
            token,
            self.patterns.buffered_buys(&token)
        );

        let market = self.market.token_info(&token).await;
        if market.is_none() {
            warn!("⚠️  No market data for {} ({})", event.token_symbol, token);
        }

        if let Some(price_usd) = market.as_ref().and_then(|m| m.price_usd) {
            let point = PricePoint {
                timestamp: event.timestamp,
                price_usd,
                volume_usd: market.as_ref().and_then(|m| m.volume_24h_usd).unwrap_or(0.0),
            };
            if let Err(e) = self.db.append_price_point(&token, &point) {
                warn!("⚠️  Failed to record price for {}: {:#}", token, e);
            }
        }

        let patterns = match self.patterns.detect_and_store(&token, now_unix()) {
            Ok(patterns) => patterns,
            Err(e) => {
                warn!("⚠️  Pattern detection failed for {}: {:#}", token, e);
                Vec::new()
            }
        };
        let event = event.with_patterns(patterns.clone());

        let reference_price_usd = self
            .market
            .reference_price_usd()
            .await
            .unwrap_or(self.reference_price_fallback_usd);

        let wallet = self
            .wallets
            .wallet_info(&event.buyer)
            .await
            .unwrap_or_else(|| WalletInfo::unknown(&event.buyer));
        let trading = self.wallets.token_trading_info(&event.buyer, &token).await;

        let text = format_buy_alert(
            &AlertContext {
                event: &event,
                market: market.as_ref(),
                reference_price_usd,
                wallet: &wallet,
                trading: trading.as_ref(),
            },
            &self.links,
        );

        let groups = self.db.groups()?;
        if groups.is_empty() {
            debug!("No registered groups for buy {}", event.tx_hash);
        }

        let mut report = DispatchReport {
            patterns,
            ..Default::default()
        };
        for group in &groups {
            match self.notifier.send_alert(group.chat_id, &text).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    error!("❌ Error sending alert to group {}: {:#}", group.chat_id, e);
                }
            }
        }

        info!(
            "📨 Buy {} on {} delivered to {}/{} groups",
            event.tx_hash,
            event.token_symbol,
            report.delivered,
            groups.len()
        );
        Ok(report)
    }
}
