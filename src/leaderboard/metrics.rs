//! Per-wallet metric computation over resolved trades.
//!
//! Pure math: the SQL stages hand this module one wallet's resolved trades
//! and it answers the remaining gates and the metric vector. Medians and
//! percentiles come from statrs; winsorisation clamps returns to the
//! wallet's own 2.5/97.5 percentiles.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use statrs::statistics::{Data, OrderStatistics};
use std::collections::BTreeSet;

/// Floor applied to per-trade returns before the log transform.
pub const LOG_RETURN_FLOOR: f64 = -0.99;

/// Hold times more negative than this are data faults and excluded.
pub const HOLD_CLOCK_SKEW_MINUTES: f64 = 5.0;

/// One resolved trade from the fact table.
#[derive(Debug, Clone)]
pub struct ResolvedTrade {
    pub entry_time: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub cost_usd: f64,
    pub pnl_usd: f64,
}

impl ResolvedTrade {
    fn ret(&self) -> f64 {
        self.pnl_usd / self.cost_usd
    }

    fn log_growth(&self) -> f64 {
        (1.0 + self.ret().max(LOG_RETURN_FLOOR)).ln()
    }

    /// Hold time in minutes, with the negative-clock guard: up to five
    /// minutes of skew counts as one minute, worse is null.
    fn hold_minutes(&self) -> Option<f64> {
        let resolved_at = self.resolved_at?;
        let minutes = (resolved_at - self.entry_time).num_seconds() as f64 / 60.0;
        if minutes >= 0.0 {
            Some(minutes.max(1.0))
        } else if minutes >= -HOLD_CLOCK_SKEW_MINUTES {
            Some(1.0)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WindowMetrics {
    pub trades: usize,
    pub active_days: usize,
    pub win_rate: f64,
    pub ev: f64,
    pub winsorized_ev: f64,
    pub log_growth_per_trade: f64,
    pub trades_per_active_day: f64,
    pub daily_log_growth: f64,
    pub avg_hold_minutes: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletMetrics {
    pub lifetime: WindowMetrics,
    pub window_14d: WindowMetrics,
    pub window_7d: WindowMetrics,
}

/// Why a wallet was dropped by the in-memory gate stages, if it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    MedianCostTooSmall,
    LifetimeLogGrowthNotPositive,
    RecentLogGrowthNotPositive,
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut data = Data::new(values.to_vec());
    data.median()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn expected_value(trades: &[&ResolvedTrade], rets: &[f64]) -> f64 {
    debug_assert_eq!(trades.len(), rets.len());
    if trades.is_empty() {
        return 0.0;
    }
    let mut win_rets = Vec::new();
    let mut loss_rets = Vec::new();
    for (trade, ret) in trades.iter().zip(rets) {
        if trade.pnl_usd > 0.0 {
            win_rets.push(*ret);
        } else {
            loss_rets.push(*ret);
        }
    }
    let win_rate = win_rets.len() as f64 / trades.len() as f64;
    win_rate * median(&win_rets) - (1.0 - win_rate) * median(&loss_rets).abs()
}

fn winsorize(rets: &[f64]) -> Vec<f64> {
    if rets.len() < 3 {
        return rets.to_vec();
    }
    let mut data = Data::new(rets.to_vec());
    let low = data.quantile(0.025);
    let high = data.quantile(0.975);
    rets.iter().map(|r| r.clamp(low, high)).collect()
}

fn window_metrics(trades: &[&ResolvedTrade]) -> WindowMetrics {
    let active_days: BTreeSet<_> = trades.iter().map(|t| t.entry_time.date_naive()).collect();
    let active_days = active_days.len();

    if trades.is_empty() {
        return WindowMetrics {
            trades: 0,
            active_days: 0,
            win_rate: 0.0,
            ev: 0.0,
            winsorized_ev: 0.0,
            log_growth_per_trade: 0.0,
            trades_per_active_day: 0.0,
            daily_log_growth: 0.0,
            avg_hold_minutes: None,
        };
    }

    let rets: Vec<f64> = trades.iter().map(|t| t.ret()).collect();
    let wins = trades.iter().filter(|t| t.pnl_usd > 0.0).count();
    let win_rate = wins as f64 / trades.len() as f64;

    let log_growth_per_trade = mean(&trades.iter().map(|t| t.log_growth()).collect::<Vec<_>>());
    let trades_per_active_day = trades.len() as f64 / active_days.max(1) as f64;

    let hold_times: Vec<f64> = trades.iter().filter_map(|t| t.hold_minutes()).collect();
    let avg_hold_minutes = if hold_times.is_empty() {
        None
    } else {
        Some(mean(&hold_times))
    };

    WindowMetrics {
        trades: trades.len(),
        active_days,
        win_rate,
        ev: expected_value(trades, &rets),
        winsorized_ev: expected_value(trades, &winsorize(&rets)),
        log_growth_per_trade,
        trades_per_active_day,
        daily_log_growth: log_growth_per_trade * trades_per_active_day,
        avg_hold_minutes,
    }
}

/// Apply the remaining gates and compute the metric vector.
///
/// `trades` are the wallet's resolved positive-cost trades; the caller has
/// already applied the count/date gates in SQL.
pub fn evaluate_wallet(
    trades: &[ResolvedTrade],
    now: DateTime<Utc>,
) -> Result<WalletMetrics, GateRejection> {
    let costs: Vec<f64> = trades.iter().map(|t| t.cost_usd).collect();
    if median(&costs) < 10.0 {
        return Err(GateRejection::MedianCostTooSmall);
    }

    let lifetime_refs: Vec<&ResolvedTrade> = trades.iter().collect();
    let cutoff_14 = now - Duration::days(14);
    let cutoff_7 = now - Duration::days(7);
    let refs_14: Vec<&ResolvedTrade> = trades
        .iter()
        .filter(|t| t.entry_time >= cutoff_14)
        .collect();
    let refs_7: Vec<&ResolvedTrade> = trades.iter().filter(|t| t.entry_time >= cutoff_7).collect();

    let lifetime = window_metrics(&lifetime_refs);
    if lifetime.log_growth_per_trade <= 0.0 {
        return Err(GateRejection::LifetimeLogGrowthNotPositive);
    }

    let window_14d = window_metrics(&refs_14);
    if window_14d.trades == 0 || window_14d.log_growth_per_trade <= 0.0 {
        return Err(GateRejection::RecentLogGrowthNotPositive);
    }

    let window_7d = window_metrics(&refs_7);

    Ok(WalletMetrics {
        lifetime,
        window_14d,
        window_7d,
    })
}
