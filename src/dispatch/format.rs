//! Telegram message formatting (HTML parse mode)

use chrono::{TimeZone, Utc};

use crate::config::TelegramConfig;
use crate::providers::{TokenMarketInfo, TokenTradingInfo, WalletInfo};
use crate::types::{BuyEvent, GroupSubscription, MonitoredToken, TradingPattern};

const MAGNITUDES: [&str; 5] = ["", "K", "M", "B", "T"];

/// Everything that goes into one buy alert
pub struct AlertContext<'a> {
    pub event: &'a BuyEvent,
    pub market: Option<&'a TokenMarketInfo>,
    pub reference_price_usd: f64,
    pub wallet: &'a WalletInfo,
    pub trading: Option<&'a TokenTradingInfo>,
}

/// Compact large amounts: 1234567 -> "1.23M"; below 1000 keeps 4 decimals
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }

    let mut scaled = value;
    let mut magnitude = 0;
    while scaled.abs() >= 1000.0 && magnitude < MAGNITUDES.len() - 1 {
        scaled /= 1000.0;
        magnitude += 1;
    }

    if magnitude == 0 {
        with_commas(scaled, 4)
    } else {
        format!("{}{}", with_commas(scaled, 2), MAGNITUDES[magnitude])
    }
}

/// Fixed decimals with thousands separators
pub fn with_commas(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };
    match frac_part {
        Some(frac) => format!("{}{}.{}", sign, grouped, frac),
        None => format!("{}{}", sign, grouped),
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn format_time(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn short_address(address: &str) -> String {
    if address.len() > 10 {
        format!("{}...{}", &address[..6], &address[address.len() - 4..])
    } else {
        address.to_string()
    }
}

pub fn format_buy_alert(ctx: &AlertContext<'_>, links: &TelegramConfig) -> String {
    let event = ctx.event;
    let symbol = escape_html(&event.token_symbol);
    let usd_value = event.reference_amount * ctx.reference_price_usd;

    let mut msg = format!(
        "<b>{} {}</b> 🔔 Buy!\n\n🤑🤑🤑🤑🤑🤑🤑🤑🤑🤑\n\n",
        escape_html(&event.token_name),
        symbol
    );
    msg += &format!(
        "💰| {} ETH (${})\n",
        with_commas(event.reference_amount, 4),
        with_commas(usd_value, 2)
    );
    msg += &format!("📈| Got: {} {}\n", format_number(event.token_amount), symbol);
    msg += &format!(
        "👤| Buyer: <a href=\"{}{}\">Wallet</a> | <a href=\"{}{}\">Tx</a>\n",
        links.etherscan_address_url, event.buyer, links.etherscan_tx_url, event.tx_hash
    );

    match ctx.trading.filter(|t| t.trade_count > 0) {
        Some(t) => {
            msg += &format!("📊| Position: Swing Trade ({} trades)\n", t.trade_count);
            msg += &format!(
                "🛒| Bought: {} tokens (${})\n",
                format_number(t.bought_amount),
                with_commas(t.bought_value_usd, 2)
            );
            msg += &format!(
                "💹| PNL: ${} ({}%)\n",
                with_commas(t.total_pnl, 2),
                with_commas(t.pnl_percent, 2)
            );
            msg += &format!(
                "💼| Remaining: {} tokens (${})\n",
                format_number(t.remaining_tokens),
                with_commas(t.current_value_usd, 2)
            );
        }
        None => msg += "🆕| Position: New\n",
    }

    let holders = ctx
        .market
        .and_then(|m| m.holders)
        .map(|h| h.to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let market_cap = ctx.market.and_then(|m| m.market_cap).unwrap_or(0.0);
    msg += &format!("👥| Holders: {}\n", holders);
    msg += &format!("💲| Market Cap: ${}\n\n", with_commas(market_cap, 2));

    let wallet = ctx.wallet;
    let status = if wallet.is_fresh_wallet {
        "Fresh".to_string()
    } else {
        format!("Old ({} days)", wallet.age_days)
    };
    msg += &format!("🧠 Wallet Status: {}\n", status);

    msg += "🐋 Other Holdings:\n";
    if wallet.top_holdings.is_empty() {
        msg += "- No significant holdings\n";
    }
    for holding in wallet.top_holdings.iter().take(3) {
        msg += &format!(
            "- ${}: {:.4} (~${})\n",
            escape_html(&holding.symbol),
            holding.balance,
            with_commas(holding.usd_value, 2)
        );
    }

    let behaviour = if wallet.is_swing_trader {
        "Swing Trader"
    } else {
        "Diamond Hands"
    };
    msg += &format!(
        "📉 Behavior: {}\n({})\n\n",
        behaviour,
        escape_html(&wallet.trading_summary)
    );

    if !event.patterns.is_empty() {
        msg += "⚠️ Patterns:\n";
        for pattern in &event.patterns {
            msg += &format!(
                "- {} ({}%, {} wallets)\n",
                pattern.pattern_type.as_str().to_uppercase(),
                with_commas(pattern.percent_change, 2),
                pattern.wallet_count
            );
        }
        msg += "\n";
    }

    let dex_url = ctx
        .market
        .and_then(|m| m.dex_url.clone())
        .unwrap_or_else(|| format!("https://dexscreener.com/ethereum/{}", event.token_address));
    msg += &format!(
        "<a href=\"https://app.uniswap.org/#/swap?outputCurrency={}\">🛒 Buy</a> | \
         <a href=\"{}\">📊 DexScreener</a> | \
         <a href=\"https://www.dextools.io/app/en/ether/pair-explorer/{}\">📈 Trending</a>",
        event.token_address, dex_url, event.token_address
    );

    msg
}

pub fn format_heartbeat(message: &str) -> String {
    format!("🔔 HEARTBEAT: {}", escape_html(message))
}

pub fn format_token_list(tokens: &[MonitoredToken]) -> String {
    if tokens.is_empty() {
        return "No tokens are currently being monitored.".to_string();
    }

    let mut msg = "List of monitored tokens:\n\n".to_string();
    for token in tokens {
        msg += &format!(
            "• {} ({})\n  {}\n\n",
            token.name, token.symbol, token.address
        );
    }
    msg
}

pub fn format_group_list(groups: &[GroupSubscription]) -> String {
    if groups.is_empty() {
        return "No groups are currently registered.".to_string();
    }

    let mut msg = "List of registered groups:\n\n".to_string();
    for group in groups {
        msg += &format!("• {} (Chat ID: {})\n", group.title, group.chat_id);
    }
    msg
}

/// `symbol_of` resolves a display symbol for a pattern's token
pub fn format_patterns(patterns: &[TradingPattern], hours: u64, symbol_of: impl Fn(&str) -> String) -> String {
    if patterns.is_empty() {
        return "No trading patterns detected in the specified time period.".to_string();
    }

    let mut msg = format!("Trading patterns detected in the last {} hours:\n\n", hours);
    for pattern in patterns {
        msg += &format!(
            "Token: {} ({})\n",
            symbol_of(&pattern.token_address),
            short_address(&pattern.token_address)
        );
        msg += &format!("Pattern: {}\n", pattern.pattern_type.as_str().to_uppercase());
        msg += &format!(
            "Time: {} to {}\n",
            format_time(pattern.start_timestamp),
            format_time(pattern.end_timestamp)
        );
        msg += &format!("Price Change: {:.2}%\n\n", pattern.percent_change);
    }
    msg
}

pub fn format_trading_info(info: &TokenTradingInfo) -> String {
    if info.trade_count == 0 {
        return "No trading activity found for this token in this wallet.".to_string();
    }

    format!(
        "Trading info for {}:\n\n\
         Total Trades: {} ({} buys, {} sells)\n\n\
         Bought: {:.4} tokens\n\
         Total Cost: ${:.2}\n\n\
         Sold: {:.4} tokens\n\
         Sold Value: ${:.2}\n\n\
         Remaining: {:.4} tokens\n\
         Current Value: ${:.2}\n\n\
         Realized PNL: ${:.2}\n\
         Unrealized PNL: ${:.2}\n\
         Total PNL: ${:.2} ({:.2}%)\n",
        info.token_symbol,
        info.trade_count,
        info.buy_count,
        info.sell_count,
        info.bought_amount,
        info.bought_value_usd,
        info.sold_amount,
        info.sold_value_usd,
        info.remaining_tokens,
        info.current_value_usd,
        info.realized_pnl,
        info.unrealized_pnl,
        info.total_pnl,
        info.pnl_percent
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Holding;
    use crate::types::PatternType;

    fn links() -> TelegramConfig {
        TelegramConfig {
            bot_token: String::new(),
            admin_chat_id: 0,
            etherscan_tx_url: "https://etherscan.io/tx/".to_string(),
            etherscan_address_url: "https://etherscan.io/address/".to_string(),
        }
    }

    fn event() -> BuyEvent {
        BuyEvent {
            tx_hash: "0xhash".to_string(),
            buyer: "0xbuyer".to_string(),
            token_address: "0xtoken".to_string(),
            token_name: "Pepe <Official>".to_string(),
            token_symbol: "PEPE".to_string(),
            pair_address: "0xpair".to_string(),
            reference_amount: 1.5,
            token_amount: 2_500_000.0,
            timestamp: 1_700_000_000,
            block_number: 1,
            transaction_index: 0,
            log_index: 0,
            patterns: Vec::new(),
        }
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0.5), "0.5000");
        assert_eq!(format_number(999.5), "999.5000");
        assert_eq!(format_number(1_234.0), "1.23K");
        assert_eq!(format_number(2_500_000.0), "2.50M");
        assert_eq!(format_number(7.1e9), "7.10B");
        assert_eq!(format_number(3.0e15), "3,000.00T");
        assert_eq!(format_number(-4_200.0), "-4.20K");
    }

    #[test]
    fn test_with_commas() {
        assert_eq!(with_commas(1234567.891, 2), "1,234,567.89");
        assert_eq!(with_commas(100.0, 2), "100.00");
        assert_eq!(with_commas(-1000.0, 0), "-1,000");
        assert_eq!(with_commas(-0.001, 2), "0.00");
    }

    #[test]
    fn test_buy_alert_new_position_with_defaults() {
        let event = event();
        let wallet = WalletInfo::unknown("0xbuyer");
        let ctx = AlertContext {
            event: &event,
            market: None,
            reference_price_usd: 2000.0,
            wallet: &wallet,
            trading: None,
        };

        let msg = format_buy_alert(&ctx, &links());
        assert!(msg.contains("Pepe &lt;Official&gt; PEPE"));
        assert!(msg.contains("💰| 1.5000 ETH ($3,000.00)"));
        assert!(msg.contains("Got: 2.50M PEPE"));
        assert!(msg.contains("https://etherscan.io/address/0xbuyer"));
        assert!(msg.contains("🆕| Position: New"));
        assert!(msg.contains("Holders: Unknown"));
        assert!(msg.contains("Old (999 days)"));
        assert!(msg.contains("No significant holdings"));
        assert!(msg.contains("Diamond Hands\n(Unknown)"));
        assert!(msg.contains("https://dexscreener.com/ethereum/0xtoken"));
    }

    #[test]
    fn test_buy_alert_with_history_and_patterns() {
        let pattern = TradingPattern {
            token_address: "0xtoken".to_string(),
            pattern_type: PatternType::PumpDump,
            start_timestamp: 0,
            end_timestamp: 10,
            start_price: 1.0,
            end_price: 0.5,
            percent_change: 100.0,
            volume_change: 400.0,
            wallet_count: 0,
            detected_at: 10,
        };
        let event = event().with_patterns(vec![pattern]);
        let wallet = WalletInfo {
            address: "0xbuyer".to_string(),
            age_days: 3,
            is_fresh_wallet: true,
            top_holdings: (0..5)
                .map(|i| Holding {
                    symbol: format!("H{}", i),
                    name: format!("Holding {}", i),
                    balance: 1.0,
                    usd_value: 100.0 - i as f64,
                })
                .collect(),
            is_swing_trader: true,
            trading_summary: "Sold 4 tokens in last 24h".to_string(),
        };
        let trading = TokenTradingInfo {
            trade_count: 3,
            bought_amount: 10_000.0,
            bought_value_usd: 50.0,
            total_pnl: 25.0,
            pnl_percent: 50.0,
            ..Default::default()
        };
        let market = TokenMarketInfo {
            market_cap: Some(1_250_000.0),
            holders: Some(420),
            dex_url: Some("https://dexscreener.com/ethereum/0xpair".to_string()),
            ..Default::default()
        };
        let ctx = AlertContext {
            event: &event,
            market: Some(&market),
            reference_price_usd: 2000.0,
            wallet: &wallet,
            trading: Some(&trading),
        };

        let msg = format_buy_alert(&ctx, &links());
        assert!(msg.contains("Position: Swing Trade (3 trades)"));
        assert!(msg.contains("Bought: 10.00K tokens ($50.00)"));
        assert!(msg.contains("PNL: $25.00 (50.00%)"));
        assert!(msg.contains("Holders: 420"));
        assert!(msg.contains("Market Cap: $1,250,000.00"));
        assert!(msg.contains("Wallet Status: Fresh"));
        assert!(msg.contains("$H2"));
        assert!(!msg.contains("$H3"));
        assert!(msg.contains("Swing Trader"));
        assert!(msg.contains("PUMP_DUMP (100.00%"));
        assert!(msg.contains("https://dexscreener.com/ethereum/0xpair"));
    }

    #[test]
    fn test_patterns_report() {
        assert!(format_patterns(&[], 24, |_| String::new()).starts_with("No trading patterns"));

        let pattern = TradingPattern {
            token_address: "0x1234567890abcdef1234567890abcdef12345678".to_string(),
            pattern_type: PatternType::Accumulation,
            start_timestamp: 0,
            end_timestamp: 3600,
            start_price: 1.0,
            end_price: 1.1,
            percent_change: 10.0,
            volume_change: 0.0,
            wallet_count: 2,
            detected_at: 3600,
        };
        let msg = format_patterns(&[pattern], 24, |_| "TKN".to_string());
        assert!(msg.contains("Token: TKN (0x1234...5678)"));
        assert!(msg.contains("Pattern: ACCUMULATION"));
        assert!(msg.contains("Time: 1970-01-01 00:00 to 1970-01-01 01:00"));
        assert!(msg.contains("Price Change: 10.00%"));
    }
}
