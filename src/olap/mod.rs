//! SQLite-backed event and fact store.
//!
//! Stand-in for the columnar OLAP store the engines read from. Holds the
//! trade-event stream, the token-to-condition map, condition resolutions,
//! and the trade-level fact table the leaderboard pipeline consumes.
//!
//! Key choices:
//! - WAL mode for concurrent reads during writes
//! - Prepared statements with explicit transactions for batch inserts
//! - `event_id` primary key makes ingest idempotent

use crate::models::{MarketResolution, SourceType, TradeEvent, TradeRole};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS trade_events (
    event_id TEXT PRIMARY KEY,
    wallet_address TEXT NOT NULL,
    tx_hash TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    condition_id TEXT NOT NULL,
    outcome_index INTEGER,
    token_id TEXT,
    side TEXT NOT NULL,
    role TEXT NOT NULL,
    tokens REAL NOT NULL,
    usdc REAL NOT NULL,
    source_type TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_events_wallet_source
    ON trade_events(wallet_address, source_type, block_number);

CREATE INDEX IF NOT EXISTS idx_events_tx
    ON trade_events(tx_hash);

CREATE INDEX IF NOT EXISTS idx_events_cursor
    ON trade_events(block_number, event_id);

CREATE TABLE IF NOT EXISTS token_map (
    token_id TEXT PRIMARY KEY,
    condition_id TEXT NOT NULL,
    outcome_index INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_token_map_condition
    ON token_map(condition_id, outcome_index);

CREATE TABLE IF NOT EXISTS condition_resolutions (
    condition_id TEXT PRIMARY KEY,
    payout_numerators TEXT NOT NULL,
    resolved_at INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS wallet_trade_facts (
    fact_id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet TEXT NOT NULL,
    condition_id TEXT NOT NULL,
    entry_time INTEGER NOT NULL,
    resolved_at INTEGER,
    is_closed INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL,
    pnl_usd REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_facts_wallet
    ON wallet_trade_facts(wallet, entry_time);
"#;

/// Shared handle to the event store. Cheap to clone.
#[derive(Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
}

fn ts_to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn millis_to_ts(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

impl EventStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("open event store at {}", db_path))?;
        conn.execute_batch(SCHEMA_SQL).context("apply event store schema")?;
        debug!("event store ready at {}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests and fixtures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory event store")?;
        conn.execute_batch(SCHEMA_SQL).context("apply event store schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Raw connection handle for same-process analytics (leaderboard stages).
    pub(crate) fn raw(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Insert one event. Returns false when the event_id was already present.
    pub fn insert_event(&self, event: &TradeEvent) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO trade_events
                 (event_id, wallet_address, tx_hash, block_number, timestamp,
                  condition_id, outcome_index, token_id, side, role, tokens, usdc, source_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    event.event_id,
                    event.wallet_address.to_lowercase(),
                    event.tx_hash.to_lowercase(),
                    event.block_number,
                    ts_to_millis(event.timestamp),
                    event.condition_id.to_lowercase(),
                    event.outcome_index,
                    event.token_id,
                    event.side.as_str(),
                    event.role.as_str(),
                    event.tokens,
                    event.usdc,
                    event.source_type.as_str(),
                ],
            )
            .context("insert trade event")?;
        Ok(changed > 0)
    }

    /// Batch insert inside one transaction.
    pub fn insert_events(&self, events: &[TradeEvent]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("begin event batch")?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO trade_events
                 (event_id, wallet_address, tx_hash, block_number, timestamp,
                  condition_id, outcome_index, token_id, side, role, tokens, usdc, source_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for event in events {
                inserted += stmt.execute(params![
                    event.event_id,
                    event.wallet_address.to_lowercase(),
                    event.tx_hash.to_lowercase(),
                    event.block_number,
                    ts_to_millis(event.timestamp),
                    event.condition_id.to_lowercase(),
                    event.outcome_index,
                    event.token_id,
                    event.side.as_str(),
                    event.role.as_str(),
                    event.tokens,
                    event.usdc,
                    event.source_type.as_str(),
                ])?;
            }
        }
        tx.commit().context("commit event batch")?;
        Ok(inserted)
    }

    pub fn upsert_token_mapping(
        &self,
        token_id: &str,
        condition_id: &str,
        outcome_index: u32,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO token_map (token_id, condition_id, outcome_index)
             VALUES (?1, ?2, ?3)",
            params![token_id, condition_id.to_lowercase(), outcome_index],
        )
        .context("upsert token mapping")?;
        Ok(())
    }

    pub fn upsert_resolution(
        &self,
        condition_id: &str,
        payout_numerators: &[f64],
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        let payload = serde_json::to_string(payout_numerators)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO condition_resolutions
             (condition_id, payout_numerators, resolved_at, is_deleted)
             VALUES (?1, ?2, ?3, 0)",
            params![condition_id.to_lowercase(), payload, ts_to_millis(resolved_at)],
        )
        .context("upsert resolution")?;
        Ok(())
    }

    /// Order-book fills for a wallet, oldest first.
    pub fn fills_for_wallet(&self, wallet: &str) -> Result<Vec<TradeEvent>> {
        self.query_events(
            "SELECT event_id, wallet_address, tx_hash, block_number, timestamp,
                    condition_id, outcome_index, token_id, side, role, tokens, usdc, source_type
             FROM trade_events
             WHERE wallet_address = ?1 AND source_type = 'clob'
             ORDER BY block_number, event_id",
            params![wallet.to_lowercase()],
        )
    }

    /// Condition-level events (splits, merges, redemptions) attributed to the
    /// wallet directly, or reachable through any of the given transaction
    /// hashes (proxy attribution).
    pub fn condition_events_for_wallet(
        &self,
        wallet: &str,
        tx_hashes: &HashSet<String>,
    ) -> Result<Vec<TradeEvent>> {
        let mut events = self.query_events(
            "SELECT event_id, wallet_address, tx_hash, block_number, timestamp,
                    condition_id, outcome_index, token_id, side, role, tokens, usdc, source_type
             FROM trade_events
             WHERE wallet_address = ?1
               AND source_type IN ('position_split', 'positions_merge', 'payout_redemption')
             ORDER BY block_number, event_id",
            params![wallet.to_lowercase()],
        )?;

        // Proxy attribution by shared tx hash, chunked to stay under the
        // SQLite bind-parameter cap.
        let hashes: Vec<&String> = tx_hashes.iter().collect();
        for chunk in hashes.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT event_id, wallet_address, tx_hash, block_number, timestamp,
                        condition_id, outcome_index, token_id, side, role, tokens, usdc, source_type
                 FROM trade_events
                 WHERE source_type IN ('position_split', 'positions_merge', 'payout_redemption')
                   AND tx_hash IN ({})
                 ORDER BY block_number, event_id",
                placeholders
            );
            let chunk_events = {
                let conn = self.conn.lock();
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    params_from_iter(chunk.iter().map(|h| h.to_lowercase())),
                    Self::row_to_event,
                )?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            };
            events.extend(chunk_events.into_iter().flatten());
        }

        Ok(events)
    }

    /// ERC-1155 transfers into the wallet (proxy-contract acquisitions).
    pub fn transfers_for_wallet(&self, wallet: &str) -> Result<Vec<TradeEvent>> {
        self.query_events(
            "SELECT event_id, wallet_address, tx_hash, block_number, timestamp,
                    condition_id, outcome_index, token_id, side, role, tokens, usdc, source_type
             FROM trade_events
             WHERE wallet_address = ?1 AND source_type = 'erc1155_transfer' AND side = 'buy'
             ORDER BY block_number, event_id",
            params![wallet.to_lowercase()],
        )
    }

    /// All non-deleted resolutions, with payout vectors normalised to sum 1.
    /// Rows with unparseable or degenerate payouts are skipped.
    pub fn resolutions(&self) -> Result<HashMap<String, MarketResolution>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT condition_id, payout_numerators, resolved_at
             FROM condition_resolutions WHERE is_deleted = 0",
        )?;
        let mut out = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        for row in rows {
            let (condition_id, raw, resolved_at) = row?;
            let numerators: Vec<f64> = match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!("unparseable payout vector for {}: {}", condition_id, e);
                    continue;
                }
            };
            let sum: f64 = numerators.iter().sum();
            if !(sum > 0.0) || numerators.iter().any(|p| *p < 0.0) {
                warn!("degenerate payout vector for {}: {:?}", condition_id, numerators);
                continue;
            }
            let payouts = numerators.iter().map(|p| p / sum).collect();
            out.insert(
                condition_id.clone(),
                MarketResolution {
                    condition_id,
                    payouts,
                    resolved_at: millis_to_ts(resolved_at),
                },
            );
        }
        Ok(out)
    }

    /// Distinct outcome indices known for a condition, from the token map.
    pub fn outcomes_for_condition(&self, condition_id: &str) -> Result<Vec<u32>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT outcome_index FROM token_map
             WHERE condition_id = ?1 ORDER BY outcome_index",
        )?;
        let rows = stmt.query_map(params![condition_id.to_lowercase()], |row| row.get(0))?;
        let out = rows.collect::<std::result::Result<Vec<u32>, _>>()?;
        Ok(out)
    }

    pub fn condition_for_token(&self, token_id: &str) -> Result<Option<(String, u32)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT condition_id, outcome_index FROM token_map WHERE token_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![token_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Events strictly after the `(block_number, event_id)` cursor, oldest
    /// first. The ingress poller tails the stream with this.
    pub fn events_after(
        &self,
        cursor_block: i64,
        cursor_event_id: &str,
        limit: usize,
    ) -> Result<Vec<TradeEvent>> {
        self.query_events(
            "SELECT event_id, wallet_address, tx_hash, block_number, timestamp,
                    condition_id, outcome_index, token_id, side, role, tokens, usdc, source_type
             FROM trade_events
             WHERE block_number > ?1 OR (block_number = ?1 AND event_id > ?2)
             ORDER BY block_number, event_id
             LIMIT ?3",
            params![cursor_block, cursor_event_id, limit as i64],
        )
    }

    pub fn insert_fact(
        &self,
        wallet: &str,
        condition_id: &str,
        entry_time: DateTime<Utc>,
        resolved_at: Option<DateTime<Utc>>,
        is_closed: bool,
        cost_usd: f64,
        pnl_usd: f64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO wallet_trade_facts
             (wallet, condition_id, entry_time, resolved_at, is_closed, cost_usd, pnl_usd)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                wallet.to_lowercase(),
                condition_id.to_lowercase(),
                ts_to_millis(entry_time),
                resolved_at.map(ts_to_millis),
                is_closed as i64,
                cost_usd,
                pnl_usd,
            ],
        )
        .context("insert wallet trade fact")?;
        Ok(())
    }

    fn query_events<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<TradeEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, Self::row_to_event)?;
        let mut out = Vec::new();
        for row in rows {
            if let Some(event) = row? {
                out.push(event);
            }
        }
        Ok(out)
    }

    /// Map a row to a TradeEvent. Rows with an unknown side/role/source are
    /// returned as None and skipped by callers (input-data fault, not fatal).
    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Option<TradeEvent>> {
        let side: String = row.get(8)?;
        let role: String = row.get(9)?;
        let source: String = row.get(12)?;

        let (side, role, source_type) = match (
            crate::models::Side::parse(&side),
            TradeRole::parse(&role),
            SourceType::parse(&source),
        ) {
            (Some(s), Some(r), Some(t)) => (s, r, t),
            _ => return Ok(None),
        };

        Ok(Some(TradeEvent {
            event_id: row.get(0)?,
            wallet_address: row.get(1)?,
            tx_hash: row.get(2)?,
            block_number: row.get(3)?,
            timestamp: millis_to_ts(row.get(4)?),
            condition_id: row.get(5)?,
            outcome_index: row.get(6)?,
            token_id: row.get(7)?,
            side,
            role,
            tokens: row.get(10)?,
            usdc: row.get(11)?,
            source_type,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn event(id: &str, wallet: &str, tx: &str, block: i64, source: SourceType) -> TradeEvent {
        TradeEvent {
            event_id: id.to_string(),
            wallet_address: wallet.to_string(),
            tx_hash: tx.to_string(),
            block_number: block,
            timestamp: Utc::now(),
            condition_id: "0xc1".to_string(),
            outcome_index: Some(0),
            token_id: None,
            side: Side::Buy,
            role: TradeRole::Taker,
            tokens: 100.0,
            usdc: 40.0,
            source_type: source,
        }
    }

    #[test]
    fn insert_is_idempotent_by_event_id() {
        let store = EventStore::open_in_memory().unwrap();
        let e = event("e1", "0xAbC", "0xt1", 1, SourceType::Clob);
        assert!(store.insert_event(&e).unwrap());
        assert!(!store.insert_event(&e).unwrap());
        assert_eq!(store.fills_for_wallet("0xabc").unwrap().len(), 1);
    }

    #[test]
    fn wallet_lookup_is_case_insensitive() {
        let store = EventStore::open_in_memory().unwrap();
        store
            .insert_event(&event("e1", "0xAABB", "0xt1", 1, SourceType::Clob))
            .unwrap();
        assert_eq!(store.fills_for_wallet("0xaabb").unwrap().len(), 1);
        assert_eq!(store.fills_for_wallet("0xAABB").unwrap().len(), 1);
    }

    #[test]
    fn proxy_attribution_follows_tx_hashes() {
        let store = EventStore::open_in_memory().unwrap();
        // Split emitted by a proxy contract, different wallet, same tx.
        store
            .insert_event(&event("e2", "0xproxy", "0xt9", 2, SourceType::PositionSplit))
            .unwrap();

        let mut txs = HashSet::new();
        txs.insert("0xt9".to_string());
        let events = store.condition_events_for_wallet("0xuser", &txs).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "e2");
    }

    #[test]
    fn degenerate_payouts_are_skipped() {
        let store = EventStore::open_in_memory().unwrap();
        store.upsert_resolution("0xgood", &[0.0, 1.0], Utc::now()).unwrap();
        store.upsert_resolution("0xbad", &[0.0, 0.0], Utc::now()).unwrap();

        let resolutions = store.resolutions().unwrap();
        assert!(resolutions.contains_key("0xgood"));
        assert!(!resolutions.contains_key("0xbad"));
        assert_eq!(resolutions["0xgood"].payouts, vec![0.0, 1.0]);
    }

    #[test]
    fn events_after_cursor_pages_in_order() {
        let store = EventStore::open_in_memory().unwrap();
        for (id, block) in [("a", 1), ("b", 2), ("c", 2), ("d", 3)] {
            store
                .insert_event(&event(id, "0xw", "0xt", block, SourceType::Clob))
                .unwrap();
        }
        let page = store.events_after(2, "b", 10).unwrap();
        let ids: Vec<&str> = page.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }
}
