//! Background price monitor for open paper positions.
//!
//! One tick: snapshot open positions, fetch a mark for each, update
//! unrealized PnL, evaluate exit rules in attachment order. Ticks are
//! mutually exclusive; a fetch failure leaves that position unchanged until
//! the next tick.

use crate::copytrade::WalletExitRegistry;
use crate::marketdata::PriceSource;
use crate::models::{AlertKind, AlertPriority, ExitRule, PaperPosition, PositionStatus, Side};
use crate::stores::{AlertStore, PositionStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const PRICE_FETCH_BOUND: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub default_price_target_pct: f64,
    pub default_stop_loss_pct: f64,
    pub follow_wallet_exits: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            default_price_target_pct: 20.0,
            default_stop_loss_pct: 10.0,
            follow_wallet_exits: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub checks_performed: u64,
    pub exits_triggered: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub poll_interval_ms: u64,
}

struct MonitorInner {
    positions: Arc<PositionStore>,
    alerts: Arc<AlertStore>,
    source: Arc<dyn PriceSource>,
    exits: Arc<WalletExitRegistry>,
    config: Mutex<MonitorConfig>,
    checks_performed: AtomicU64,
    exits_triggered: AtomicU64,
    last_check: Mutex<Option<DateTime<Utc>>>,
    running: AtomicBool,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

pub struct PriceMonitor {
    inner: Arc<MonitorInner>,
}

impl PriceMonitor {
    pub fn new(
        config: MonitorConfig,
        positions: Arc<PositionStore>,
        alerts: Arc<AlertStore>,
        source: Arc<dyn PriceSource>,
        exits: Arc<WalletExitRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                positions,
                alerts,
                source,
                exits,
                config: Mutex::new(config),
                checks_performed: AtomicU64::new(0),
                exits_triggered: AtomicU64::new(0),
                last_check: Mutex::new(None),
                running: AtomicBool::new(false),
                stop: Mutex::new(None),
            }),
        }
    }

    /// Start the background loop. Replaces the config when one is supplied;
    /// a second start while running is a no-op.
    pub fn start(&self, config: Option<MonitorConfig>) {
        if let Some(config) = config {
            *self.inner.config.lock() = config;
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        *self.inner.stop.lock() = Some(tx);

        let inner = Arc::clone(&self.inner);
        let interval_ms = inner.config.lock().poll_interval_ms.max(100);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("price monitor started (every {}ms)", interval_ms);
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        MonitorInner::tick(&inner).await;
                    }
                }
            }
            info!("price monitor stopped");
        });
    }

    pub fn ensure_running(&self) {
        if !self.inner.running.load(Ordering::SeqCst) {
            self.start(None);
        }
    }

    /// Stop the loop. Open positions are left unchanged.
    pub fn stop(&self) {
        if let Some(tx) = self.inner.stop.lock().take() {
            let _ = tx.send(true);
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Run one tick inline. Tests drive the monitor with this.
    pub async fn run_tick(&self) {
        MonitorInner::tick(&self.inner).await;
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            checks_performed: self.inner.checks_performed.load(Ordering::Relaxed),
            exits_triggered: self.inner.exits_triggered.load(Ordering::Relaxed),
            last_check: *self.inner.last_check.lock(),
            poll_interval_ms: self.inner.config.lock().poll_interval_ms,
        }
    }
}

fn position_pnl(position: &PaperPosition, price: f64) -> f64 {
    match position.side {
        Side::Buy => (price - position.entry_price) * position.tokens,
        Side::Sell => (position.entry_price - price) * position.tokens,
    }
}

impl MonitorInner {
    async fn tick(inner: &Arc<MonitorInner>) {
        let open = inner.positions.open_positions();
        let follow_wallet_exits = inner.config.lock().follow_wallet_exits;

        for position in open {
            let fetched = tokio::time::timeout(
                PRICE_FETCH_BOUND,
                inner.source.price(&position.condition_id, &position.outcome),
            )
            .await;
            let price = match fetched {
                Ok(Some(price)) if price.is_finite() => price,
                Ok(_) => {
                    debug!(
                        "no price for {} {} this tick",
                        position.condition_id, position.outcome
                    );
                    continue;
                }
                Err(_) => {
                    warn!(
                        "price fetch timed out for {} {}",
                        position.condition_id, position.outcome
                    );
                    continue;
                }
            };

            let unrealized = position_pnl(&position, price);
            inner.positions.update_mark(&position.id, price, unrealized);

            // Re-read for the raised watermark before rule evaluation.
            let Some(current) = inner.positions.get(&position.id) else {
                continue;
            };
            if let Some(reason) =
                evaluate_exit_rules(&current, price, follow_wallet_exits, &inner.exits)
            {
                let realized = position_pnl(&current, price);
                if let Some(closed) = inner.positions.close(
                    &current.id,
                    price,
                    realized,
                    reason,
                    PositionStatus::Closed,
                ) {
                    inner.exits_triggered.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "exit {} on {} {} at {:.4}: pnl {:+.2}",
                        reason, closed.condition_id, closed.outcome, price, realized
                    );
                    inner.alerts.emit(
                        AlertKind::ExitTriggered,
                        AlertPriority::High,
                        format!("Exit triggered: {}", reason),
                        format!(
                            "{} {} closed at {:.4}, realized {:+.2}",
                            closed.condition_id, closed.outcome, price, realized
                        ),
                        Some(closed.condition_id.clone()),
                        Some(closed.id.clone()),
                        Some(closed.decision_id.clone()),
                    );
                }
            }
        }

        inner.checks_performed.fetch_add(1, Ordering::Relaxed);
        *inner.last_check.lock() = Some(Utc::now());
    }
}

/// First rule that fires wins, in attachment order.
fn evaluate_exit_rules(
    position: &PaperPosition,
    current: f64,
    follow_wallet_exits: bool,
    exits: &WalletExitRegistry,
) -> Option<&'static str> {
    for attachment in &position.exit_rules {
        match &attachment.rule {
            ExitRule::PriceTarget { price } => {
                if current >= *price {
                    return Some("price_target");
                }
            }
            ExitRule::StopLoss { price } => {
                if current <= *price {
                    return Some("stop_loss");
                }
            }
            ExitRule::TrailingStop { pct } => {
                if current <= position.high_watermark * (1.0 - pct) {
                    return Some("trailing_stop");
                }
            }
            ExitRule::WalletExit { wallets } => {
                if follow_wallet_exits
                    && exits.sold_since(
                        &position.condition_id,
                        &position.outcome,
                        wallets,
                        attachment.attached_at,
                    )
                {
                    return Some("wallet_exit");
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitRuleAttachment;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Replays a fixed mark sequence, one price per call.
    struct ScriptedPrices {
        marks: Mutex<VecDeque<f64>>,
    }

    impl ScriptedPrices {
        fn new(marks: &[f64]) -> Arc<Self> {
            Arc::new(Self {
                marks: Mutex::new(marks.iter().copied().collect()),
            })
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedPrices {
        async fn price(&self, _condition_id: &str, _outcome: &str) -> Option<f64> {
            self.marks.lock().pop_front()
        }
    }

    fn open_position(entry: f64, tokens: f64, rules: Vec<ExitRule>) -> PaperPosition {
        PaperPosition {
            id: "p1".to_string(),
            decision_id: "d1".to_string(),
            source_event_id: "e1".to_string(),
            condition_id: "0xc".to_string(),
            market_id: "m".to_string(),
            side: Side::Buy,
            outcome: "yes".to_string(),
            entry_price: entry,
            size_usd: entry * tokens,
            tokens,
            current_price: entry,
            high_watermark: entry,
            unrealized_pnl: 0.0,
            realized_pnl: None,
            exit_price: None,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            exit_reason: None,
            exit_rules: rules
                .into_iter()
                .map(|rule| ExitRuleAttachment {
                    rule,
                    attached_at: Utc::now(),
                })
                .collect(),
        }
    }

    fn monitor_with(
        source: Arc<dyn PriceSource>,
        config: MonitorConfig,
    ) -> (PriceMonitor, Arc<PositionStore>, Arc<AlertStore>, Arc<WalletExitRegistry>) {
        let positions = Arc::new(PositionStore::new());
        let alerts = Arc::new(AlertStore::new());
        let exits = Arc::new(WalletExitRegistry::new());
        let monitor = PriceMonitor::new(
            config,
            Arc::clone(&positions),
            Arc::clone(&alerts),
            source,
            Arc::clone(&exits),
        );
        (monitor, positions, alerts, exits)
    }

    #[tokio::test]
    async fn price_target_fires_on_the_tick_that_reaches_it() {
        let source = ScriptedPrices::new(&[0.42, 0.45, 0.47, 0.48, 0.50]);
        let (monitor, positions, alerts, _) = monitor_with(source, MonitorConfig::default());
        positions.insert(open_position(
            0.40,
            100.0,
            vec![
                ExitRule::PriceTarget { price: 0.48 },
                ExitRule::StopLoss { price: 0.36 },
            ],
        ));

        for _ in 0..3 {
            monitor.run_tick().await;
        }
        assert_eq!(positions.get("p1").unwrap().status, PositionStatus::Open);

        monitor.run_tick().await;
        let p = positions.get("p1").unwrap();
        assert_eq!(p.status, PositionStatus::Closed);
        assert_eq!(p.exit_reason.as_deref(), Some("price_target"));
        assert!((p.realized_pnl.unwrap() - 8.0).abs() < 1e-9);

        // Fifth tick has nothing left to check.
        monitor.run_tick().await;
        let status = monitor.status();
        assert_eq!(status.checks_performed, 5);
        assert_eq!(status.exits_triggered, 1);
        assert!(status.last_check.is_some());

        let alert = &alerts.recent(1)[0];
        assert_eq!(alert.kind, AlertKind::ExitTriggered);
        assert_eq!(alert.position_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn stop_loss_fires_below_the_stop() {
        let source = ScriptedPrices::new(&[0.38, 0.35]);
        let (monitor, positions, _, _) = monitor_with(source, MonitorConfig::default());
        positions.insert(open_position(
            0.40,
            50.0,
            vec![
                ExitRule::PriceTarget { price: 0.48 },
                ExitRule::StopLoss { price: 0.36 },
            ],
        ));

        monitor.run_tick().await;
        assert_eq!(positions.get("p1").unwrap().status, PositionStatus::Open);

        monitor.run_tick().await;
        let p = positions.get("p1").unwrap();
        assert_eq!(p.exit_reason.as_deref(), Some("stop_loss"));
        assert!((p.realized_pnl.unwrap() + 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn trailing_stop_tracks_the_high_watermark() {
        let source = ScriptedPrices::new(&[0.50, 0.60, 0.53]);
        let (monitor, positions, _, _) = monitor_with(source, MonitorConfig::default());
        positions.insert(open_position(
            0.40,
            10.0,
            vec![ExitRule::TrailingStop { pct: 0.10 }],
        ));

        monitor.run_tick().await;
        monitor.run_tick().await;
        assert_eq!(positions.get("p1").unwrap().status, PositionStatus::Open);
        assert_eq!(positions.get("p1").unwrap().high_watermark, 0.60);

        // 0.53 <= 0.60 * 0.90.
        monitor.run_tick().await;
        let p = positions.get("p1").unwrap();
        assert_eq!(p.exit_reason.as_deref(), Some("trailing_stop"));
    }

    #[tokio::test]
    async fn fetch_failure_leaves_the_position_unchanged() {
        let source = ScriptedPrices::new(&[]);
        let (monitor, positions, _, _) = monitor_with(source, MonitorConfig::default());
        positions.insert(open_position(
            0.40,
            10.0,
            vec![ExitRule::StopLoss { price: 0.36 }],
        ));

        monitor.run_tick().await;
        let p = positions.get("p1").unwrap();
        assert_eq!(p.status, PositionStatus::Open);
        assert_eq!(p.current_price, 0.40);
        assert_eq!(monitor.status().checks_performed, 1);
    }

    #[tokio::test]
    async fn wallet_exit_fires_only_when_followed_and_after_attachment() {
        let source = ScriptedPrices::new(&[0.41, 0.41]);
        let config = MonitorConfig {
            follow_wallet_exits: true,
            ..Default::default()
        };
        let (monitor, positions, _, exits) = monitor_with(source, config);
        let watched = "0x1111111111111111111111111111111111111111";
        positions.insert(open_position(
            0.40,
            10.0,
            vec![ExitRule::WalletExit {
                wallets: vec![watched.to_string()],
            }],
        ));

        monitor.run_tick().await;
        assert_eq!(positions.get("p1").unwrap().status, PositionStatus::Open);

        exits.record_sell("0xc", "yes", watched);
        monitor.run_tick().await;
        let p = positions.get("p1").unwrap();
        assert_eq!(p.exit_reason.as_deref(), Some("wallet_exit"));
    }

    #[tokio::test]
    async fn attachment_order_decides_simultaneous_fires() {
        // A mark that satisfies both rules: stop attached first wins.
        let source = ScriptedPrices::new(&[0.50]);
        let (monitor, positions, _, _) = monitor_with(source, MonitorConfig::default());
        positions.insert(open_position(
            0.40,
            10.0,
            vec![
                ExitRule::StopLoss { price: 0.55 },
                ExitRule::PriceTarget { price: 0.45 },
            ],
        ));

        monitor.run_tick().await;
        let p = positions.get("p1").unwrap();
        assert_eq!(p.exit_reason.as_deref(), Some("stop_loss"));
    }
}
