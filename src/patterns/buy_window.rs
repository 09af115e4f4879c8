/// Rolling per-token window of recent buys
///
/// Feeds the accumulation detector. Buys are kept in arrival order and
/// pruned against the newest block timestamp seen for the token.

use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::types::BuyEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct WindowBuy {
    pub tx_hash: String,
    pub buyer: String,
    pub timestamp: i64,
    pub reference_amount: f64,
}

impl From<&BuyEvent> for WindowBuy {
    fn from(event: &BuyEvent) -> Self {
        Self {
            tx_hash: event.tx_hash.clone(),
            buyer: event.buyer.to_lowercase(),
            timestamp: event.timestamp,
            reference_amount: event.reference_amount,
        }
    }
}

pub struct BuyWindow {
    tokens: HashMap<String, VecDeque<WindowBuy>>,
    window_secs: i64,
}

impl BuyWindow {
    pub fn new(window_secs: i64) -> Self {
        Self {
            tokens: HashMap::new(),
            window_secs,
        }
    }

    /// Record a buy and drop anything older than the window
    pub fn record(&mut self, event: &BuyEvent) {
        let buys = self
            .tokens
            .entry(event.token_address.to_lowercase())
            .or_default();

        buys.push_back(WindowBuy::from(event));

        let newest = buys.iter().map(|b| b.timestamp).max().unwrap_or(event.timestamp);
        let cutoff = newest - self.window_secs;
        let before = buys.len();
        buys.retain(|b| b.timestamp >= cutoff);

        if buys.len() < before {
            debug!(
                "Pruned {} buys from window for {}",
                before - buys.len(),
                event.token_address
            );
        }
    }

    /// Buys for `token` with `timestamp >= since`
    pub fn buys_since(&self, token: &str, since: i64) -> Vec<WindowBuy> {
        self.tokens
            .get(&token.to_lowercase())
            .map(|buys| buys.iter().filter(|b| b.timestamp >= since).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, token: &str) -> usize {
        self.tokens.get(&token.to_lowercase()).map_or(0, |b| b.len())
    }

    /// Drop tokens no longer monitored
    pub fn retain_tokens(&mut self, keep: &[String]) {
        self.tokens
            .retain(|token, _| keep.iter().any(|k| k.eq_ignore_ascii_case(token)));
    }
}
