//! Operator commands: monitored tokens, alert groups and reports.
//!
//! Every token change is written to the database first and then the pair
//! registry is rebuilt from the database, so the database stays the source
//! of truth for the monitored set.

use anyhow::{Context, Result};
use ethers::types::Address;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::db::Database;
use crate::dispatch::format::{format_group_list, format_patterns, format_token_list, format_trading_info};
use crate::patterns::PatternEngine;
use crate::providers::WalletReputationProvider;
use crate::registry::PairRegistry;
use crate::types::{address_key, parse_address, GroupSubscription, MonitoredToken, PatternType};

const DEFAULT_UNRESOLVED_RETRY: Duration = Duration::from_secs(900);

/// Token set handed to the registry on the last rebuild
#[derive(Default)]
struct SyncState {
    attempted: HashSet<Address>,
    at: Option<Instant>,
}

pub struct AdminService {
    db: Database,
    registry: Arc<PairRegistry>,
    wallets: Arc<dyn WalletReputationProvider>,
    patterns: Option<Arc<PatternEngine>>,
    sync: Mutex<SyncState>,
    unresolved_retry: Duration,
}

impl AdminService {
    pub fn new(db: Database, registry: Arc<PairRegistry>, wallets: Arc<dyn WalletReputationProvider>) -> Self {
        Self {
            db,
            registry,
            wallets,
            patterns: None,
            sync: Mutex::new(SyncState::default()),
            unresolved_retry: DEFAULT_UNRESOLVED_RETRY,
        }
    }

    /// How long stored tokens without a pair wait before another lookup
    pub fn with_unresolved_retry(mut self, every: Duration) -> Self {
        self.unresolved_retry = every;
        self
    }

    /// Prune the engine's buy window whenever the monitored set changes
    pub fn with_pattern_engine(mut self, engine: Arc<PatternEngine>) -> Self {
        self.patterns = Some(engine);
        self
    }

    // ---- tokens -------------------------------------------------------------

    /// Validate, resolve the pair, persist with metadata, refresh the registry
    pub async fn add_token(&self, raw_address: &str, added_by: i64) -> Result<MonitoredToken> {
        let address = parse_address(raw_address)
            .with_context(|| format!("Invalid token address: {}", raw_address.trim()))?;

        let token = self.registry.register(address).await?.monitored_token();
        self.db.add_token(&token, added_by)?;
        info!("➕ Token {} ({}) added by {}", token.symbol, token.address, added_by);

        self.sync_registry().await?;
        Ok(token)
    }

    /// Returns false when the token was not being monitored
    pub async fn remove_token(&self, raw_address: &str) -> Result<bool> {
        let address = parse_address(raw_address)
            .with_context(|| format!("Invalid token address: {}", raw_address.trim()))?;

        let removed = self.db.remove_token(&address_key(&address))?;
        if removed {
            info!("➖ Token {} removed", address_key(&address));
            self.sync_registry().await?;
        }
        Ok(removed)
    }

    pub fn tokens(&self) -> Result<Vec<MonitoredToken>> {
        self.db.tokens()
    }

    pub fn token_list_report(&self) -> Result<String> {
        Ok(format_token_list(&self.db.tokens()?))
    }

    /// Seed the database from `initial` when it holds no tokens, then load the
    /// registry. Returns the number of registered pairs.
    pub async fn bootstrap(&self, initial: &[Address]) -> Result<usize> {
        if self.db.tokens()?.is_empty() && !initial.is_empty() {
            info!("🌱 No stored tokens, seeding {} from configuration", initial.len());
            for address in initial {
                match self.registry.register(*address).await {
                    Ok(pair) => self.db.add_token(&pair.monitored_token(), 0)?,
                    Err(e) => warn!("⚠️  Skipping configured token {}: {}", address_key(address), e),
                }
            }
        }

        self.sync_registry().await
    }

    /// Rebuild the registry from the stored token list
    pub async fn sync_registry(&self) -> Result<usize> {
        let tokens = self.stored_addresses()?;
        let count = self.registry.update(&tokens).await;
        {
            let mut state = self.sync_state();
            state.attempted = tokens.iter().copied().collect();
            state.at = Some(Instant::now());
        }

        if let Some(engine) = &self.patterns {
            let keys: Vec<String> = tokens.iter().map(address_key).collect();
            engine.retain_tokens(&keys);
        }
        Ok(count)
    }

    /// Rebuild when the stored set differs from the one last handed to the
    /// registry. Stored tokens that did not resolve are retried only once
    /// every `unresolved_retry`.
    pub async fn refresh_if_changed(&self) -> Result<Option<usize>> {
        let stored: HashSet<Address> = self.stored_addresses()?.into_iter().collect();

        let (changed, retry_due) = {
            let state = self.sync_state();
            (
                state.attempted != stored,
                state.at.map_or(true, |at| at.elapsed() >= self.unresolved_retry),
            )
        };
        if changed {
            return self.sync_registry().await.map(Some);
        }

        let registered: HashSet<Address> = self.registry.tokens().into_iter().collect();
        let unresolved = stored.difference(&registered).count();
        if unresolved > 0 && retry_due {
            info!("🔁 Retrying {} unresolved tokens", unresolved);
            return self.sync_registry().await.map(Some);
        }
        Ok(None)
    }

    fn sync_state(&self) -> MutexGuard<'_, SyncState> {
        match self.sync.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn stored_addresses(&self) -> Result<Vec<Address>> {
        Ok(self
            .db
            .tokens()?
            .iter()
            .filter_map(|t| {
                let parsed = parse_address(&t.address);
                if parsed.is_none() {
                    warn!("⚠️  Ignoring malformed stored token address {}", t.address);
                }
                parsed
            })
            .collect())
    }

    // ---- groups -------------------------------------------------------------

    pub fn register_group(&self, chat_id: i64, title: &str, registered_by: i64) -> Result<bool> {
        let added = self.db.add_group(chat_id, title, registered_by)?;
        if added {
            info!("👥 Group {} ({}) registered", title, chat_id);
        }
        Ok(added)
    }

    pub fn unregister_group(&self, chat_id: i64) -> Result<bool> {
        let removed = self.db.remove_group(chat_id)?;
        if removed {
            info!("👋 Group {} unregistered", chat_id);
        }
        Ok(removed)
    }

    pub fn groups(&self) -> Result<Vec<GroupSubscription>> {
        self.db.groups()
    }

    pub fn group_list_report(&self) -> Result<String> {
        Ok(format_group_list(&self.db.groups()?))
    }

    // ---- reports ------------------------------------------------------------

    pub fn patterns_report(
        &self,
        token: Option<&str>,
        pattern_type: Option<PatternType>,
        hours: u64,
    ) -> Result<String> {
        let token = match token {
            Some(raw) => Some(address_key(
                &parse_address(raw).with_context(|| format!("Invalid token address: {}", raw.trim()))?,
            )),
            None => None,
        };

        let patterns = self.db.recent_patterns(token.as_deref(), pattern_type, hours)?;
        let symbols: HashMap<String, String> = self
            .db
            .tokens()?
            .into_iter()
            .map(|t| (t.address, t.symbol))
            .collect();

        Ok(format_patterns(&patterns, hours, |address| {
            symbols
                .get(&address.to_lowercase())
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string())
        }))
    }

    /// Wallet trading summary for one token
    pub async fn token_info_report(&self, raw_wallet: &str, raw_token: &str) -> Result<String> {
        let wallet = parse_address(raw_wallet)
            .with_context(|| format!("Invalid wallet address: {}", raw_wallet.trim()))?;
        let token = parse_address(raw_token)
            .with_context(|| format!("Invalid token address: {}", raw_token.trim()))?;

        let info = self
            .wallets
            .token_trading_info(&address_key(&wallet), &address_key(&token))
            .await
            .unwrap_or_default();
        Ok(format_trading_info(&info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternConfig;
    use crate::providers::tests::MockWallets;
    use crate::providers::TokenTradingInfo;
    use crate::registry::tests::MockLookup;
    use crate::registry::RegistryError;
    use crate::types::{PatternType, TradingPattern};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn service(lookup: MockLookup, wallets: MockWallets) -> (TempDir, AdminService, Arc<PairRegistry>) {
        service_with(Arc::new(lookup), wallets)
    }

    fn service_with(lookup: Arc<MockLookup>, wallets: MockWallets) -> (TempDir, AdminService, Arc<PairRegistry>) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("admin.db"), false, 2).unwrap();
        let registry = Arc::new(PairRegistry::new(lookup, addr(1)));
        let admin = AdminService::new(db, registry.clone(), Arc::new(wallets));
        (dir, admin, registry)
    }

    #[tokio::test]
    async fn test_add_and_remove_token_refreshes_registry() {
        let lookup = MockLookup::default().with_pair(addr(10), addr(110));
        let (_dir, admin, registry) = service(lookup, MockWallets::default());

        let token = admin.add_token(&address_key(&addr(10)).replace('a', "A"), 42).await.unwrap();
        assert_eq!(token.symbol, "TK10");
        assert_eq!(token.address, address_key(&addr(10)));
        assert_eq!(admin.tokens().unwrap().len(), 1);
        assert!(registry.snapshot().contains_key(&addr(110)));

        assert!(admin.remove_token(&address_key(&addr(10))).await.unwrap());
        assert!(registry.is_empty());
        assert!(!admin.remove_token(&address_key(&addr(10))).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_token_rejects_bad_input() {
        let (_dir, admin, _registry) = service(MockLookup::default(), MockWallets::default());

        assert!(admin.add_token("0x1234", 1).await.is_err());

        let err = admin.add_token(&address_key(&addr(10)), 1).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RegistryError>(), Some(RegistryError::NoPair(_))));
        assert!(admin.tokens().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_prefers_stored_tokens() {
        let lookup = MockLookup::default()
            .with_pair(addr(10), addr(110))
            .with_pair(addr(11), addr(111));
        let (_dir, admin, registry) = service(lookup, MockWallets::default());

        // empty database: seeded from configuration, unknown pairs skipped
        let count = admin.bootstrap(&[addr(10), addr(99)]).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(admin.tokens().unwrap().len(), 1);

        // non-empty database: configuration ignored
        let count = admin.bootstrap(&[addr(11)]).await.unwrap();
        assert_eq!(count, 1);
        assert!(registry.snapshot().contains_key(&addr(110)));
        assert!(!registry.snapshot().contains_key(&addr(111)));
    }

    #[tokio::test]
    async fn test_refresh_only_when_changed() {
        let lookup = MockLookup::default()
            .with_pair(addr(10), addr(110))
            .with_pair(addr(11), addr(111));
        let (_dir, admin, registry) = service(lookup, MockWallets::default());
        admin.add_token(&address_key(&addr(10)), 1).await.unwrap();

        assert_eq!(admin.refresh_if_changed().await.unwrap(), None);

        // another process wrote to the database
        admin
            .db
            .add_token(
                &MonitoredToken {
                    address: address_key(&addr(11)),
                    name: "Token 11".to_string(),
                    symbol: "TK11".to_string(),
                    decimals: 18,
                },
                7,
            )
            .unwrap();
        assert_eq!(admin.refresh_if_changed().await.unwrap(), Some(2));
        assert_eq!(registry.len(), 2);
    }

    fn stored(address: Address) -> MonitoredToken {
        MonitoredToken {
            address: address_key(&address),
            name: "Stored".to_string(),
            symbol: "STO".to_string(),
            decimals: 18,
        }
    }

    #[tokio::test]
    async fn test_unresolved_token_does_not_rebuild_every_refresh() {
        let lookup = Arc::new(MockLookup::default().with_pair(addr(10), addr(110)));
        let (_dir, admin, registry) = service_with(lookup.clone(), MockWallets::default());
        admin.db.add_token(&stored(addr(10)), 1).unwrap();
        admin.db.add_token(&stored(addr(0x63)), 1).unwrap();

        assert_eq!(admin.bootstrap(&[]).await.unwrap(), 1);
        let calls = lookup.get_pair_calls.load(Ordering::SeqCst);

        for _ in 0..5 {
            assert_eq!(admin.refresh_if_changed().await.unwrap(), None);
        }
        assert_eq!(lookup.get_pair_calls.load(Ordering::SeqCst), calls);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_token_retried_when_due() {
        let lookup = Arc::new(MockLookup::default().with_pair(addr(10), addr(110)));
        let (_dir, admin, _registry) = service_with(lookup.clone(), MockWallets::default());
        let admin = admin.with_unresolved_retry(Duration::ZERO);
        admin.db.add_token(&stored(addr(10)), 1).unwrap();
        admin.db.add_token(&stored(addr(0x63)), 1).unwrap();
        admin.sync_registry().await.unwrap();
        let calls = lookup.get_pair_calls.load(Ordering::SeqCst);

        assert_eq!(admin.refresh_if_changed().await.unwrap(), Some(1));
        assert_eq!(lookup.get_pair_calls.load(Ordering::SeqCst), calls + 2);
    }

    #[tokio::test]
    async fn test_sync_prunes_buy_window() {
        let lookup = MockLookup::default().with_pair(addr(10), addr(110));
        let (dir, admin, _registry) = service(lookup, MockWallets::default());
        let db = Database::open(dir.path().join("admin.db"), false, 1).unwrap();
        let engine = Arc::new(PatternEngine::new(
            db,
            PatternConfig {
                pump_dump_percent_threshold: 20.0,
                pump_dump_volume_increase: 50.0,
                pump_dump_window_hours: 24,
                accumulation_threshold: 5,
                accumulation_window_hours: 48,
                accumulation_min_wallet_buys: 3,
                accumulation_max_volatility: 15.0,
            },
        ));
        let admin = admin.with_pattern_engine(engine.clone());

        engine.record_buy(&crate::patterns::buy_window::tests::buy_event("0xgone", "0xa", 1_000));
        assert_eq!(engine.buffered_buys("0xgone"), 1);
        admin.add_token(&address_key(&addr(10)), 1).await.unwrap();

        assert_eq!(engine.buffered_buys("0xgone"), 0);
    }

    #[test]
    fn test_group_registration() {
        let (_dir, admin, _registry) = service(MockLookup::default(), MockWallets::default());

        assert!(admin.register_group(-100, "Alpha", 1).unwrap());
        assert!(!admin.register_group(-100, "Alpha", 1).unwrap());
        assert!(admin.group_list_report().unwrap().contains("Alpha (Chat ID: -100)"));

        assert!(admin.unregister_group(-100).unwrap());
        assert!(!admin.unregister_group(-100).unwrap());
        assert!(admin.groups().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_patterns_report_uses_symbols() {
        let lookup = MockLookup::default().with_pair(addr(10), addr(110));
        let (_dir, admin, _registry) = service(lookup, MockWallets::default());
        admin.add_token(&address_key(&addr(10)), 1).await.unwrap();

        let now = crate::db::now_unix();
        admin
            .db
            .append_pattern(&TradingPattern {
                token_address: address_key(&addr(10)),
                pattern_type: PatternType::Accumulation,
                start_timestamp: now - 100,
                end_timestamp: now,
                start_price: 1.0,
                end_price: 1.05,
                percent_change: 5.0,
                volume_change: 0.0,
                wallet_count: 2,
                detected_at: now,
            })
            .unwrap();

        let report = admin.patterns_report(None, None, 24).unwrap();
        assert!(report.contains("Token: TK10"));
        assert!(report.contains("Pattern: ACCUMULATION"));

        let report = admin.patterns_report(None, Some(PatternType::PumpDump), 24).unwrap();
        assert!(report.starts_with("No trading patterns"));
        assert!(admin.patterns_report(Some("nope"), None, 24).is_err());
    }

    #[tokio::test]
    async fn test_token_info_report() {
        let mut wallets = MockWallets::default();
        wallets.trading.insert(
            address_key(&addr(0x77)),
            TokenTradingInfo {
                token_symbol: "TK10".to_string(),
                trade_count: 3,
                buy_count: 2,
                sell_count: 1,
                ..Default::default()
            },
        );
        let (_dir, admin, _registry) = service(MockLookup::default(), wallets);

        let report = admin
            .token_info_report(&address_key(&addr(0x77)), &address_key(&addr(10)))
            .await
            .unwrap();
        assert!(report.contains("Trading info for TK10"));
        assert!(report.contains("Total Trades: 3 (2 buys, 1 sells)"));

        let report = admin
            .token_info_report(&address_key(&addr(0x78)), &address_key(&addr(10)))
            .await
            .unwrap();
        assert!(report.starts_with("No trading activity"));
    }
}
