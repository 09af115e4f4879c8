//! Buy/sell classification of decoded swaps.
//!
//! Pure functions only. The reference side of the pair decides which shape
//! counts as a buy: the reference asset goes in, the monitored token comes out.

use ethers::types::U256;

use crate::types::{PairSide, SwapEvent, TradeSide};

/// Reference asset (WETH) always has 18 decimals
const REFERENCE_DECIMALS: u8 = 18;

/// Classify a swap relative to the reference side of its pair
pub fn classify(swap: &SwapEvent, reference_side: PairSide) -> TradeSide {
    let token0_in_token1_out = !swap.amount0_in.is_zero() && !swap.amount1_out.is_zero();
    let token1_in_token0_out = !swap.amount1_in.is_zero() && !swap.amount0_out.is_zero();

    let (buy_shape, sell_shape) = match reference_side {
        PairSide::Token0 => (token0_in_token1_out, token1_in_token0_out),
        PairSide::Token1 => (token1_in_token0_out, token0_in_token1_out),
    };

    match (buy_shape, sell_shape) {
        (true, false) => TradeSide::Buy,
        (false, true) => TradeSide::Sell,
        _ => TradeSide::Ambiguous,
    }
}

/// Normalized (reference_amount, token_amount) for a swap classified as Buy
pub fn buy_amounts(swap: &SwapEvent, reference_side: PairSide, token_decimals: u8) -> Option<(f64, f64)> {
    if classify(swap, reference_side) != TradeSide::Buy {
        return None;
    }

    let (reference_raw, token_raw) = match reference_side {
        PairSide::Token0 => (swap.amount0_in, swap.amount1_out),
        PairSide::Token1 => (swap.amount1_in, swap.amount0_out),
    };

    Some((
        normalize(reference_raw, REFERENCE_DECIMALS),
        normalize(token_raw, token_decimals),
    ))
}

/// raw / 10^decimals as a float
pub fn normalize(raw: U256, decimals: u8) -> f64 {
    // U256 overflows f64's integer range, go through the decimal string
    let value = raw.to_string().parse::<f64>().unwrap_or(0.0);
    value / 10f64.powi(decimals as i32)
}
