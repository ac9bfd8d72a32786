//! Leaderboard pipeline: a strict linear chain of filter stages over the
//! trade fact table, followed by metric computation and an atomic
//! table-rename publication.
//!
//! The count/date gates run as SQL stages, each materialising a temp
//! relation consumed by the next. The median/log-growth gates and the
//! metric vector run in Rust over the surviving wallets, fanned out with
//! rayon. Readers only ever see a fully-built table: the `_new` table is
//! swapped in with a rename pair and the `_old` table dropped.

pub mod metrics;

use crate::olap::EventStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use metrics::{evaluate_wallet, GateRejection, ResolvedTrade, WalletMetrics};
use rayon::prelude::*;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

/// Upper bound on one refresh invocation.
pub const REFRESH_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: String,
    pub wallets: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub success: bool,
    pub version: String,
    pub wallets: usize,
    pub steps: Vec<StepReport>,
    pub total_duration_ms: u64,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardRow {
    pub wallet: String,
    pub rank: i64,
    pub resolved_trades: i64,
    pub active_days: i64,
    pub daily_log_growth_14d: f64,
    pub metrics: serde_json::Value,
    pub refreshed_at: DateTime<Utc>,
}

struct RankedWallet {
    wallet: String,
    metrics: WalletMetrics,
}

/// Rebuild and publish the leaderboard. Idempotent: re-running against
/// unchanged facts produces identical rows modulo `refreshed_at`.
pub fn refresh_leaderboard(store: &EventStore, now: DateTime<Utc>) -> Result<RefreshReport> {
    let started = Instant::now();
    let mut steps = Vec::new();

    let handle = store.raw();
    let facts_by_wallet = {
        let conn = handle.lock();
        run_sql_stages(&conn, now, &mut steps)?
    };

    // Gates 5-7 and the metric vector, fanned out per wallet.
    let stage_start = Instant::now();
    let mut wallets: Vec<(&String, &Vec<ResolvedTrade>)> = facts_by_wallet.iter().collect();
    wallets.sort_by(|a, b| a.0.cmp(b.0));

    let evaluated: Vec<(String, std::result::Result<WalletMetrics, GateRejection>)> = wallets
        .par_iter()
        .map(|(wallet, trades)| ((*wallet).clone(), evaluate_wallet(trades, now)))
        .collect();

    let mut survivors: Vec<RankedWallet> = Vec::new();
    let mut after_median = 0usize;
    let mut after_lifetime = 0usize;
    let mut after_recent = 0usize;
    for (wallet, outcome) in evaluated {
        match outcome {
            Ok(metrics) => {
                after_median += 1;
                after_lifetime += 1;
                after_recent += 1;
                survivors.push(RankedWallet { wallet, metrics });
            }
            Err(GateRejection::MedianCostTooSmall) => {}
            Err(GateRejection::LifetimeLogGrowthNotPositive) => {
                after_median += 1;
            }
            Err(GateRejection::RecentLogGrowthNotPositive) => {
                after_median += 1;
                after_lifetime += 1;
            }
        }
    }
    let stage_ms = stage_start.elapsed().as_millis() as u64;
    steps.push(StepReport {
        step: "median_cost".to_string(),
        wallets: after_median,
        duration_ms: stage_ms,
    });
    steps.push(StepReport {
        step: "lifetime_log_growth".to_string(),
        wallets: after_lifetime,
        duration_ms: 0,
    });
    steps.push(StepReport {
        step: "recent_log_growth".to_string(),
        wallets: after_recent,
        duration_ms: 0,
    });

    // Ranking signal: 14-day daily log growth, descending; wallet breaks
    // ties so reruns stay byte-stable.
    survivors.sort_by(|a, b| {
        b.metrics
            .window_14d
            .daily_log_growth
            .partial_cmp(&a.metrics.window_14d.daily_log_growth)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.wallet.cmp(&b.wallet))
    });

    let publish_start = Instant::now();
    {
        let conn = handle.lock();
        publish(&conn, &survivors, now)?;
    }
    steps.push(StepReport {
        step: "publish".to_string(),
        wallets: survivors.len(),
        duration_ms: publish_start.elapsed().as_millis() as u64,
    });

    let report = RefreshReport {
        success: true,
        version: format!("v{}", now.timestamp()),
        wallets: survivors.len(),
        steps,
        total_duration_ms: started.elapsed().as_millis() as u64,
        refreshed_at: now,
    };
    info!(
        "leaderboard refreshed: {} wallets in {}ms",
        report.wallets, report.total_duration_ms
    );
    Ok(report)
}

/// SQL gate chain (stages 1-4), returning the surviving wallets' resolved
/// positive-cost trades.
fn run_sql_stages(
    conn: &Connection,
    now: DateTime<Utc>,
    steps: &mut Vec<StepReport>,
) -> Result<HashMap<String, Vec<ResolvedTrade>>> {
    let cutoff_5d = (now - Duration::days(5)).timestamp_millis();

    let stages: [(&str, String); 4] = [
        (
            "active_days",
            "CREATE TEMP TABLE lb_s1 AS
             SELECT wallet FROM wallet_trade_facts
             GROUP BY wallet
             HAVING COUNT(DISTINCT date(entry_time / 1000, 'unixepoch')) > 5"
                .to_string(),
        ),
        (
            "distinct_markets",
            "CREATE TEMP TABLE lb_s2 AS
             SELECT f.wallet FROM wallet_trade_facts f
             JOIN lb_s1 USING (wallet)
             GROUP BY f.wallet
             HAVING COUNT(DISTINCT f.condition_id) > 8"
                .to_string(),
        ),
        (
            "resolved_trades",
            "CREATE TEMP TABLE lb_s3 AS
             SELECT f.wallet FROM wallet_trade_facts f
             JOIN lb_s2 USING (wallet)
             WHERE f.is_closed = 1 AND f.cost_usd > 0
             GROUP BY f.wallet
             HAVING COUNT(*) > 30"
                .to_string(),
        ),
        (
            "recent_trade",
            format!(
                "CREATE TEMP TABLE lb_s4 AS
                 SELECT f.wallet FROM wallet_trade_facts f
                 JOIN lb_s3 USING (wallet)
                 GROUP BY f.wallet
                 HAVING MAX(f.entry_time) >= {}",
                cutoff_5d
            ),
        ),
    ];

    for table in ["lb_s1", "lb_s2", "lb_s3", "lb_s4"] {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS temp.{}", table))?;
    }

    for (i, (name, sql)) in stages.iter().enumerate() {
        let stage_start = Instant::now();
        conn.execute_batch(sql)
            .with_context(|| format!("leaderboard stage {}", name))?;
        let count: usize = conn.query_row(
            &format!("SELECT COUNT(*) FROM lb_s{}", i + 1),
            [],
            |row| row.get::<_, i64>(0),
        )? as usize;
        steps.push(StepReport {
            step: name.to_string(),
            wallets: count,
            duration_ms: stage_start.elapsed().as_millis() as u64,
        });
    }

    let mut facts: HashMap<String, Vec<ResolvedTrade>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT f.wallet, f.entry_time, f.resolved_at, f.cost_usd, f.pnl_usd
             FROM wallet_trade_facts f
             JOIN lb_s4 USING (wallet)
             WHERE f.is_closed = 1 AND f.cost_usd > 0
             ORDER BY f.wallet, f.entry_time",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?;
        for row in rows {
            let (wallet, entry_ms, resolved_ms, cost_usd, pnl_usd) = row?;
            let entry_time = Utc
                .timestamp_millis_opt(entry_ms)
                .single()
                .unwrap_or_else(Utc::now);
            let resolved_at = resolved_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single());
            facts.entry(wallet).or_default().push(ResolvedTrade {
                entry_time,
                resolved_at,
                cost_usd,
                pnl_usd,
            });
        }
    }

    for table in ["lb_s1", "lb_s2", "lb_s3", "lb_s4"] {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS temp.{}", table))?;
    }

    Ok(facts)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Build `leaderboard_new`, then swap it in. The rename pair is the single
/// atomic point at which readers see the new rows.
fn publish(conn: &Connection, survivors: &[RankedWallet], now: DateTime<Utc>) -> Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS leaderboard_new;
         CREATE TABLE leaderboard_new (
             wallet TEXT PRIMARY KEY,
             rank INTEGER NOT NULL,
             resolved_trades INTEGER NOT NULL,
             active_days INTEGER NOT NULL,
             daily_log_growth_14d REAL NOT NULL,
             metrics_json TEXT NOT NULL,
             refreshed_at INTEGER NOT NULL
         ) WITHOUT ROWID;",
    )
    .context("create leaderboard_new")?;

    {
        let mut stmt = conn.prepare(
            "INSERT INTO leaderboard_new
             (wallet, rank, resolved_trades, active_days, daily_log_growth_14d,
              metrics_json, refreshed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for (i, entry) in survivors.iter().enumerate() {
            let metrics_json = serde_json::to_string(&entry.metrics)?;
            stmt.execute(params![
                entry.wallet,
                (i + 1) as i64,
                entry.metrics.lifetime.trades as i64,
                entry.metrics.lifetime.active_days as i64,
                entry.metrics.window_14d.daily_log_growth,
                metrics_json,
                now.timestamp_millis(),
            ])?;
        }
    }

    conn.execute_batch("DROP TABLE IF EXISTS leaderboard_old;")?;
    if table_exists(conn, "leaderboard")? {
        conn.execute_batch(
            "BEGIN;
             ALTER TABLE leaderboard RENAME TO leaderboard_old;
             ALTER TABLE leaderboard_new RENAME TO leaderboard;
             COMMIT;",
        )
        .context("swap leaderboard tables")?;
    } else {
        conn.execute_batch("ALTER TABLE leaderboard_new RENAME TO leaderboard;")
            .context("install first leaderboard")?;
    }
    conn.execute_batch("DROP TABLE IF EXISTS leaderboard_old;")?;
    Ok(())
}

/// Read the published leaderboard, best first. Empty before first publish.
pub fn read_leaderboard(store: &EventStore, limit: usize) -> Result<Vec<LeaderboardRow>> {
    let handle = store.raw();
    let conn = handle.lock();
    if !table_exists(&conn, "leaderboard")? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT wallet, rank, resolved_trades, active_days, daily_log_growth_14d,
                metrics_json, refreshed_at
         FROM leaderboard ORDER BY rank LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, f64>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, i64>(6)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (wallet, rank, resolved_trades, active_days, growth, metrics_json, refreshed_ms) =
            row?;
        out.push(LeaderboardRow {
            wallet,
            rank,
            resolved_trades,
            active_days,
            daily_log_growth_14d: growth,
            metrics: serde_json::from_str(&metrics_json).unwrap_or(serde_json::Value::Null),
            refreshed_at: Utc
                .timestamp_millis_opt(refreshed_ms)
                .single()
                .unwrap_or_else(Utc::now),
        });
    }
    Ok(out)
}
