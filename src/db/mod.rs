use anyhow::{Context, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{GroupSubscription, MonitoredToken, PatternType, PricePoint, TradingPattern};

/// SQLite persistence shared by the scanner, the alert pipeline and the
/// admin commands. Cloning is cheap; every clone draws from the same pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P, wal_mode: bool, pool_size: u32) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch("PRAGMA foreign_keys=ON;")
        });

        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(Duration::from_secs(10))
            .build(manager)
            .context("Failed to create database connection pool")?;

        let db = Self { pool };

        if wal_mode {
            db.conn()?
                .execute_batch("PRAGMA journal_mode=WAL;")
                .context("Failed to enable WAL mode")?;
        }

        db.initialize_schema()?;

        info!("✅ Database initialized at {}", path.as_ref().display());
        Ok(db)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context("Failed to get database connection from pool")
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                r#"
            -- Chats receiving buy alerts
            CREATE TABLE IF NOT EXISTS registered_groups (
                chat_id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                registered_by INTEGER NOT NULL,
                registered_at INTEGER NOT NULL
            );

            -- Tokens under watch (address is lowercase hex)
            CREATE TABLE IF NOT EXISTS monitored_tokens (
                address TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                decimals INTEGER NOT NULL DEFAULT 18,
                added_by INTEGER NOT NULL,
                added_at INTEGER NOT NULL
            );

            -- Transactions already turned into alerts
            CREATE TABLE IF NOT EXISTS processed_transactions (
                tx_hash TEXT PRIMARY KEY,
                processed_at INTEGER NOT NULL
            );

            -- One sample per (token, second), later writes win
            CREATE TABLE IF NOT EXISTS token_price_history (
                token_address TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                price_usd REAL NOT NULL,
                volume_usd REAL NOT NULL,
                PRIMARY KEY(token_address, timestamp)
            );

            -- Append-only detections
            CREATE TABLE IF NOT EXISTS trading_patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token_address TEXT NOT NULL,
                pattern_type TEXT CHECK(pattern_type IN ('pump_dump', 'accumulation')) NOT NULL,
                start_timestamp INTEGER NOT NULL,
                end_timestamp INTEGER NOT NULL,
                start_price REAL NOT NULL,
                end_price REAL NOT NULL,
                percent_change REAL NOT NULL,
                volume_change REAL NOT NULL,
                wallet_count INTEGER NOT NULL,
                detected_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_patterns_token_time ON trading_patterns(token_address, detected_at);
            CREATE INDEX IF NOT EXISTS idx_patterns_time ON trading_patterns(detected_at);
            "#,
            )
            .context("Failed to initialize database schema")?;

        info!("📊 Database schema initialized");
        Ok(())
    }

    // ---- groups -------------------------------------------------------------

    /// Returns false if the chat was already registered
    pub fn add_group(&self, chat_id: i64, title: &str, registered_by: i64) -> Result<bool> {
        let inserted = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO registered_groups (chat_id, title, registered_by, registered_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![chat_id, title, registered_by, now_unix()],
            )
            .context("Failed to register group")?;

        debug!("Registered group {} ({} rows)", chat_id, inserted);
        Ok(inserted == 1)
    }

    pub fn remove_group(&self, chat_id: i64) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM registered_groups WHERE chat_id = ?1", params![chat_id])
            .context("Failed to remove group")?;
        Ok(removed > 0)
    }

    pub fn groups(&self) -> Result<Vec<GroupSubscription>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT chat_id, title, registered_by, registered_at FROM registered_groups ORDER BY registered_at",
        )?;

        let groups = stmt
            .query_map([], |row| {
                Ok(GroupSubscription {
                    chat_id: row.get(0)?,
                    title: row.get(1)?,
                    registered_by: row.get(2)?,
                    registered_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load groups")?;

        Ok(groups)
    }

    // ---- monitored tokens ---------------------------------------------------

    pub fn add_token(&self, token: &MonitoredToken, added_by: i64) -> Result<()> {
        self.conn()?
            .execute(
                r#"
            INSERT OR REPLACE INTO monitored_tokens (address, name, symbol, decimals, added_by, added_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
                params![
                    token.address.to_lowercase(),
                    token.name,
                    token.symbol,
                    token.decimals,
                    added_by,
                    now_unix(),
                ],
            )
            .context("Failed to insert monitored token")?;

        debug!("Inserted monitored token: {}", token.address);
        Ok(())
    }

    pub fn remove_token(&self, address: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM monitored_tokens WHERE address = ?1",
                params![address.to_lowercase()],
            )
            .context("Failed to remove monitored token")?;
        Ok(removed > 0)
    }

    pub fn tokens(&self) -> Result<Vec<MonitoredToken>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT address, name, symbol, decimals FROM monitored_tokens ORDER BY added_at, address",
        )?;

        let tokens = stmt
            .query_map([], |row| {
                Ok(MonitoredToken {
                    address: row.get(0)?,
                    name: row.get(1)?,
                    symbol: row.get(2)?,
                    decimals: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load monitored tokens")?;

        Ok(tokens)
    }

    // ---- processed transactions ---------------------------------------------

    pub fn is_processed(&self, tx_hash: &str) -> Result<bool> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT 1 FROM processed_transactions WHERE tx_hash = ?1 LIMIT 1")?;
        let exists = stmt.exists(params![tx_hash.to_lowercase()])?;
        Ok(exists)
    }

    pub fn mark_processed(&self, tx_hash: &str) -> Result<()> {
        self.mark_processed_if_new(tx_hash).map(|_| ())
    }

    /// Atomically mark `tx_hash`. True only for the caller that inserted it.
    pub fn mark_processed_if_new(&self, tx_hash: &str) -> Result<bool> {
        let inserted = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO processed_transactions (tx_hash, processed_at) VALUES (?1, ?2)",
                params![tx_hash.to_lowercase(), now_unix()],
            )
            .context("Failed to mark transaction processed")?;
        Ok(inserted == 1)
    }

    // ---- price history ------------------------------------------------------

    pub fn append_price_point(&self, token_address: &str, point: &PricePoint) -> Result<()> {
        self.conn()?
            .execute(
                r#"
            INSERT OR REPLACE INTO token_price_history (token_address, timestamp, price_usd, volume_usd)
            VALUES (?1, ?2, ?3, ?4)
            "#,
                params![
                    token_address.to_lowercase(),
                    point.timestamp,
                    point.price_usd,
                    point.volume_usd,
                ],
            )
            .context("Failed to append price point")?;
        Ok(())
    }

    /// Samples with `timestamp >= since`, ascending
    pub fn price_history_since(&self, token_address: &str, since: i64) -> Result<Vec<PricePoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, price_usd, volume_usd
            FROM token_price_history
            WHERE token_address = ?1 AND timestamp >= ?2
            ORDER BY timestamp ASC
            "#,
        )?;

        let points = stmt
            .query_map(params![token_address.to_lowercase(), since], |row| {
                Ok(PricePoint {
                    timestamp: row.get(0)?,
                    price_usd: row.get(1)?,
                    volume_usd: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load price history")?;

        Ok(points)
    }

    pub fn price_history(&self, token_address: &str, window_hours: u64) -> Result<Vec<PricePoint>> {
        self.price_history_since(token_address, now_unix() - hours_to_secs(window_hours))
    }

    // ---- patterns -----------------------------------------------------------

    pub fn append_pattern(&self, pattern: &TradingPattern) -> Result<()> {
        self.conn()?
            .execute(
                r#"
            INSERT INTO trading_patterns (
                token_address, pattern_type, start_timestamp, end_timestamp,
                start_price, end_price, percent_change, volume_change,
                wallet_count, detected_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
                params![
                    pattern.token_address.to_lowercase(),
                    pattern.pattern_type.as_str(),
                    pattern.start_timestamp,
                    pattern.end_timestamp,
                    pattern.start_price,
                    pattern.end_price,
                    pattern.percent_change,
                    pattern.volume_change,
                    pattern.wallet_count,
                    pattern.detected_at,
                ],
            )
            .context("Failed to append trading pattern")?;

        debug!(
            "Stored {} pattern for {}",
            pattern.pattern_type, pattern.token_address
        );
        Ok(())
    }

    /// Patterns detected in the last `window_hours`, newest first
    pub fn recent_patterns(
        &self,
        token_address: Option<&str>,
        pattern_type: Option<PatternType>,
        window_hours: u64,
    ) -> Result<Vec<TradingPattern>> {
        let since = now_unix() - hours_to_secs(window_hours);
        let token = token_address.map(|t| t.to_lowercase());
        let kind = pattern_type.map(|p| p.as_str().to_string());

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT token_address, pattern_type, start_timestamp, end_timestamp,
                   start_price, end_price, percent_change, volume_change,
                   wallet_count, detected_at
            FROM trading_patterns
            WHERE detected_at >= ?1
              AND (?2 IS NULL OR token_address = ?2)
              AND (?3 IS NULL OR pattern_type = ?3)
            ORDER BY detected_at DESC, id DESC
            "#,
        )?;

        let rows = stmt
            .query_map(params![since, token, kind], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, u32>(8)?,
                    row.get::<_, i64>(9)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load trading patterns")?;

        rows.into_iter()
            .map(|(token_address, kind, start, end, sp, ep, pct, vol, wallets, detected)| {
                Ok(TradingPattern {
                    token_address,
                    pattern_type: kind.parse()?,
                    start_timestamp: start,
                    end_timestamp: end,
                    start_price: sp,
                    end_price: ep,
                    percent_change: pct,
                    volume_change: vol,
                    wallet_count: wallets,
                    detected_at: detected,
                })
            })
            .collect()
    }
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn hours_to_secs(hours: u64) -> i64 {
    (hours as i64).saturating_mul(3600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("monitor.db"), true, 4).unwrap();
        (dir, db)
    }

    fn pattern(token: &str, kind: PatternType, detected_at: i64) -> TradingPattern {
        TradingPattern {
            token_address: token.to_string(),
            pattern_type: kind,
            start_timestamp: detected_at - 100,
            end_timestamp: detected_at,
            start_price: 1.0,
            end_price: 2.0,
            percent_change: 100.0,
            volume_change: 400.0,
            wallet_count: 0,
            detected_at,
        }
    }

    #[test]
    fn test_price_point_later_write_wins() {
        let (_dir, db) = open_temp();
        let ts = now_unix();

        db.append_price_point("0xABC", &PricePoint { timestamp: ts, price_usd: 1.0, volume_usd: 10.0 })
            .unwrap();
        db.append_price_point("0xabc", &PricePoint { timestamp: ts, price_usd: 2.5, volume_usd: 20.0 })
            .unwrap();

        let history = db.price_history("0xabc", 1).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].price_usd, 2.5);
        assert_eq!(history[0].volume_usd, 20.0);
    }

    #[test]
    fn test_price_history_window_and_order() {
        let (_dir, db) = open_temp();
        let now = now_unix();

        for (offset, price) in [(10, 3.0), (7200, 1.0), (30, 2.0)] {
            db.append_price_point("0xabc", &PricePoint { timestamp: now - offset, price_usd: price, volume_usd: 0.0 })
                .unwrap();
        }

        let history = db.price_history("0xabc", 1).unwrap();
        let prices: Vec<f64> = history.iter().map(|p| p.price_usd).collect();
        assert_eq!(prices, vec![2.0, 3.0]);
    }

    #[test]
    fn test_mark_processed_if_new_is_once() {
        let (_dir, db) = open_temp();

        assert!(!db.is_processed("0xdead").unwrap());
        assert!(db.mark_processed_if_new("0xdead").unwrap());
        assert!(!db.mark_processed_if_new("0xDEAD").unwrap());
        assert!(db.is_processed("0xdead").unwrap());
    }

    #[test]
    fn test_token_crud() {
        let (_dir, db) = open_temp();
        let token = MonitoredToken {
            address: "0xAbC0000000000000000000000000000000000001".to_string(),
            name: "Test".to_string(),
            symbol: "TST".to_string(),
            decimals: 9,
        };

        db.add_token(&token, 42).unwrap();
        let tokens = db.tokens().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].address, "0xabc0000000000000000000000000000000000001");
        assert_eq!(tokens[0].decimals, 9);

        assert!(db.remove_token("0xABC0000000000000000000000000000000000001").unwrap());
        assert!(!db.remove_token("0xabc0000000000000000000000000000000000001").unwrap());
        assert!(db.tokens().unwrap().is_empty());
    }

    #[test]
    fn test_group_crud() {
        let (_dir, db) = open_temp();

        assert!(db.add_group(-100, "Alpha", 1).unwrap());
        assert!(!db.add_group(-100, "Alpha again", 1).unwrap());
        assert!(db.add_group(-200, "Beta", 1).unwrap());
        assert_eq!(db.groups().unwrap().len(), 2);

        assert!(db.remove_group(-100).unwrap());
        let groups = db.groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].title, "Beta");
    }

    #[test]
    fn test_recent_patterns_filters() {
        let (_dir, db) = open_temp();
        let now = now_unix();

        db.append_pattern(&pattern("0xaaa", PatternType::PumpDump, now - 60)).unwrap();
        db.append_pattern(&pattern("0xaaa", PatternType::Accumulation, now - 30)).unwrap();
        db.append_pattern(&pattern("0xbbb", PatternType::PumpDump, now - 10)).unwrap();
        db.append_pattern(&pattern("0xbbb", PatternType::PumpDump, now - 10 * 3600)).unwrap();

        let all = db.recent_patterns(None, None, 1).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].token_address, "0xbbb");

        let pumps = db.recent_patterns(None, Some(PatternType::PumpDump), 1).unwrap();
        assert_eq!(pumps.len(), 2);

        let token_a = db.recent_patterns(Some("0xAAA"), None, 1).unwrap();
        assert_eq!(token_a.len(), 2);
        assert_eq!(token_a[0].pattern_type, PatternType::Accumulation);

        assert_eq!(db.recent_patterns(Some("0xbbb"), None, 24).unwrap().len(), 2);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("monitor.db");

        {
            let db = Database::open(&path, false, 1).unwrap();
            db.mark_processed("0x01").unwrap();
        }

        let db = Database::open(&path, false, 1).unwrap();
        assert!(db.is_processed("0x01").unwrap());
    }
}
