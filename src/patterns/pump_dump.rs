/// Pump-and-dump detection over a price/volume series
///
/// A pump-and-dump is a sharp rise to a single peak, a sharp fall after it,
/// and a volume spike relative to the volume leading up to the peak. The
/// series is expected ascending by timestamp and may be sampled irregularly.

use crate::config::PatternConfig;
use crate::types::{PatternType, PricePoint, TradingPattern};

#[derive(Debug, Clone, PartialEq)]
pub struct PumpDumpSignal {
    pub start: PricePoint,
    pub peak: PricePoint,
    pub end: PricePoint,
    pub pump_percent: f64,
    pub dump_percent: f64,
    pub volume_increase: f64,
}

impl PumpDumpSignal {
    pub fn to_pattern(&self, token_address: &str, detected_at: i64) -> TradingPattern {
        TradingPattern {
            token_address: token_address.to_lowercase(),
            pattern_type: PatternType::PumpDump,
            start_timestamp: self.start.timestamp,
            end_timestamp: self.end.timestamp,
            start_price: self.start.price_usd,
            end_price: self.end.price_usd,
            percent_change: self.pump_percent,
            volume_change: self.volume_increase,
            wallet_count: 0,
            detected_at,
        }
    }
}

/// Run the detector; `None` unless every threshold is met
pub fn detect_pump_dump(series: &[PricePoint], config: &PatternConfig) -> Option<PumpDumpSignal> {
    let signal = measure(series)?;

    let threshold = config.pump_dump_percent_threshold;
    if signal.pump_percent >= threshold
        && signal.dump_percent >= threshold
        && signal.volume_increase >= config.pump_dump_volume_increase
    {
        Some(signal)
    } else {
        None
    }
}

/// Pump/dump/volume figures around the global price peak.
///
/// Needs at least two points. Zero denominators give 0%.
pub fn measure(series: &[PricePoint]) -> Option<PumpDumpSignal> {
    if series.len() < 2 {
        return None;
    }
    let last = series.len() - 1;

    // First occurrence of the maximum
    let peak_idx = series
        .iter()
        .enumerate()
        .fold(0, |best, (i, p)| if p.price_usd > series[best].price_usd { i } else { best });
    let peak = series[peak_idx];

    let start = if peak_idx == 0 {
        series[0]
    } else {
        lowest(&series[..peak_idx])
    };
    let end = if peak_idx == last {
        series[last]
    } else {
        lowest(&series[peak_idx + 1..])
    };

    let pump_percent = percent_of(peak.price_usd - start.price_usd, start.price_usd);
    let dump_percent = percent_of(peak.price_usd - end.price_usd, peak.price_usd);

    let mean_volume_before = if peak_idx == 0 {
        series[0].volume_usd
    } else {
        series[..peak_idx].iter().map(|p| p.volume_usd).sum::<f64>() / peak_idx as f64
    };
    let max_volume = series
        .iter()
        .map(|p| p.volume_usd)
        .fold(f64::MIN, f64::max);
    let volume_increase = percent_of(max_volume - mean_volume_before, mean_volume_before);

    Some(PumpDumpSignal {
        start,
        peak,
        end,
        pump_percent,
        dump_percent,
        volume_increase,
    })
}

// First occurrence of the minimum price
fn lowest(points: &[PricePoint]) -> PricePoint {
    points
        .iter()
        .copied()
        .fold(points[0], |best, p| if p.price_usd < best.price_usd { p } else { best })
}

fn percent_of(delta: f64, base: f64) -> f64 {
    if base > 0.0 {
        delta / base * 100.0
    } else {
        0.0
    }
}
