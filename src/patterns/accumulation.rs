/// Accumulation detection
///
/// Repeated buys by the same wallets while the price stays flat. Buys come
/// from the rolling [`BuyWindow`](super::BuyWindow); prices from the stored
/// series for the same window.

use std::collections::HashMap;

use super::WindowBuy;
use crate::config::PatternConfig;
use crate::types::{PatternType, PricePoint, TradingPattern};

#[derive(Debug, Clone, PartialEq)]
pub struct AccumulationSignal {
    /// Wallets at or above the per-wallet buy threshold, sorted
    pub wallets: Vec<String>,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub start_price: f64,
    pub end_price: f64,
    pub percent_change: f64,
    /// Coefficient of variation of prices, in percent
    pub volatility: f64,
}

impl AccumulationSignal {
    pub fn to_pattern(&self, token_address: &str, detected_at: i64) -> TradingPattern {
        TradingPattern {
            token_address: token_address.to_lowercase(),
            pattern_type: PatternType::Accumulation,
            start_timestamp: self.start_timestamp,
            end_timestamp: self.end_timestamp,
            start_price: self.start_price,
            end_price: self.end_price,
            percent_change: self.percent_change,
            volume_change: 0.0,
            wallet_count: self.wallets.len() as u32,
            detected_at,
        }
    }
}

pub fn detect_accumulation(
    buys: &[WindowBuy],
    series: &[PricePoint],
    config: &PatternConfig,
) -> Option<AccumulationSignal> {
    if buys.len() < config.accumulation_threshold {
        return None;
    }

    let mut by_wallet: HashMap<&str, Vec<&WindowBuy>> = HashMap::new();
    for buy in buys {
        by_wallet.entry(buy.buyer.as_str()).or_default().push(buy);
    }
    by_wallet.retain(|_, wallet_buys| wallet_buys.len() >= config.accumulation_min_wallet_buys);

    if by_wallet.is_empty() || series.len() < 2 {
        return None;
    }

    let volatility = coefficient_of_variation(series)?;
    if volatility >= config.accumulation_max_volatility {
        return None;
    }

    let accumulating = by_wallet.values().flatten();
    let start_timestamp = accumulating.clone().map(|b| b.timestamp).min()?;
    let end_timestamp = accumulating.map(|b| b.timestamp).max()?;

    let first = series[0].price_usd;
    let last = series[series.len() - 1].price_usd;

    let start_price = series
        .iter()
        .find(|p| p.timestamp >= start_timestamp)
        .map(|p| p.price_usd)
        .unwrap_or(first);
    let end_price = series
        .iter()
        .rev()
        .find(|p| p.timestamp <= end_timestamp)
        .map(|p| p.price_usd)
        .unwrap_or(last);

    let percent_change = if start_price > 0.0 {
        (end_price - start_price) / start_price * 100.0
    } else {
        0.0
    };

    let mut wallets: Vec<String> = by_wallet.keys().map(|w| w.to_string()).collect();
    wallets.sort();

    Some(AccumulationSignal {
        wallets,
        start_timestamp,
        end_timestamp,
        start_price,
        end_price,
        percent_change,
        volatility,
    })
}

/// Population standard deviation over mean, in percent.
/// `None` when the mean price is not positive.
pub fn coefficient_of_variation(series: &[PricePoint]) -> Option<f64> {
    if series.is_empty() {
        return None;
    }
    let n = series.len() as f64;
    let mean = series.iter().map(|p| p.price_usd).sum::<f64>() / n;
    if mean <= 0.0 {
        return None;
    }
    let variance = series
        .iter()
        .map(|p| (p.price_usd - mean).powi(2))
        .sum::<f64>()
        / n;
    Some(variance.sqrt() / mean * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PatternConfig {
        PatternConfig {
            pump_dump_percent_threshold: 20.0,
            pump_dump_volume_increase: 50.0,
            pump_dump_window_hours: 24,
            accumulation_threshold: 5,
            accumulation_window_hours: 48,
            accumulation_min_wallet_buys: 3,
            accumulation_max_volatility: 15.0,
        }
    }

    fn buy(buyer: &str, timestamp: i64) -> WindowBuy {
        WindowBuy {
            tx_hash: format!("0x{}{}", buyer, timestamp),
            buyer: buyer.to_string(),
            timestamp,
            reference_amount: 0.1,
        }
    }

    fn series(prices: &[f64]) -> Vec<PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| PricePoint {
                timestamp: 1_000 + i as i64 * 100,
                price_usd: *p,
                volume_usd: 1_000.0,
            })
            .collect()
    }

    fn one_wallet_buys() -> Vec<WindowBuy> {
        (0..5).map(|i| buy("0xwhale", 1_050 + i * 100)).collect()
    }

    #[test]
    fn test_fires_on_flat_price() {
        let prices = series(&[1.00, 1.02, 0.99, 1.01, 1.00, 1.03]);
        let signal = detect_accumulation(&one_wallet_buys(), &prices, &config()).unwrap();

        assert_eq!(signal.wallets, vec!["0xwhale".to_string()]);
        assert!(signal.volatility < 15.0);
        assert_eq!(signal.start_timestamp, 1_050);
        assert_eq!(signal.end_timestamp, 1_450);
        // first sample at/after 1050 is t=1100, last at/before 1450 is t=1400
        assert_eq!(signal.start_price, 1.02);
        assert_eq!(signal.end_price, 1.00);

        let pattern = signal.to_pattern("0xToken", 2_000);
        assert_eq!(pattern.wallet_count, 1);
        assert_eq!(pattern.pattern_type, PatternType::Accumulation);
    }

    #[test]
    fn test_volatile_price_does_not_fire() {
        let prices = series(&[1.0, 2.0, 0.5, 1.5, 3.0]);
        assert!(coefficient_of_variation(&prices).unwrap() >= 15.0);
        assert!(detect_accumulation(&one_wallet_buys(), &prices, &config()).is_none());
    }

    #[test]
    fn test_too_few_buys() {
        let buys: Vec<_> = (0..4).map(|i| buy("0xwhale", 1_000 + i)).collect();
        assert!(detect_accumulation(&buys, &series(&[1.0, 1.0]), &config()).is_none());
    }

    #[test]
    fn test_no_repeat_wallet() {
        let buys: Vec<_> = ["a", "b", "c", "d", "e", "a", "b"]
            .iter()
            .enumerate()
            .map(|(i, w)| buy(w, 1_000 + i as i64))
            .collect();
        assert!(detect_accumulation(&buys, &series(&[1.0, 1.0]), &config()).is_none());
    }

    #[test]
    fn test_needs_two_prices() {
        assert!(detect_accumulation(&one_wallet_buys(), &series(&[1.0]), &config()).is_none());
    }

    #[test]
    fn test_prices_fall_back_to_series_ends() {
        // All buys before the first sample
        let buys: Vec<_> = (0..5).map(|i| buy("0xwhale", 10 + i)).collect();
        let prices = series(&[1.0, 1.1]);
        let signal = detect_accumulation(&buys, &prices, &config()).unwrap();
        assert_eq!(signal.start_price, 1.0);
        assert_eq!(signal.end_price, 1.1);
    }
}
