//! End-to-end flow over a file-backed fixture store: seeded trade events
//! drive the ingress poller into the copy-trade engine, consensus opens a
//! paper position, and the price monitor closes it on a target exit.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use pulsebot_backend::copytrade::{
    ConsensusMode, CopyTradeConfig, CopyTradeEngine, DryRunAdapter, MonitorConfig, PriceMonitor,
    WalletExitRegistry,
};
use pulsebot_backend::ingress::{poll_once, IngressCursor};
use pulsebot_backend::marketdata::PriceSource;
use pulsebot_backend::models::{
    AlertKind, DecisionStatus, PositionStatus, Side, SourceType, TradeEvent, TradeRole,
};
use pulsebot_backend::olap::EventStore;
use pulsebot_backend::pnl::{compute_wallet_pnl, Cohort, PnlOptions};
use pulsebot_backend::stores::{AlertStore, LogStore, PositionStore};

const W1: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const W2: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

struct ScriptedPrices {
    marks: Mutex<VecDeque<f64>>,
}

#[async_trait]
impl PriceSource for ScriptedPrices {
    async fn price(&self, _condition_id: &str, _outcome: &str) -> Option<f64> {
        self.marks.lock().pop_front()
    }
}

fn fill(id: &str, wallet: &str, block: i64, side: Side, tokens: f64, usdc: f64) -> TradeEvent {
    TradeEvent {
        event_id: id.to_string(),
        wallet_address: wallet.to_string(),
        tx_hash: format!("0xtx{}", id),
        block_number: block,
        timestamp: Utc::now(),
        condition_id: "0xc0ffee".to_string(),
        outcome_index: Some(0),
        token_id: Some("0xtoken0".to_string()),
        side,
        role: TradeRole::Taker,
        tokens,
        usdc,
        source_type: SourceType::Clob,
    }
}

#[tokio::test]
async fn consensus_opens_a_position_and_the_monitor_exits_it() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("fixture.db");
    let store = EventStore::open(db_path.to_str().unwrap()).expect("open fixture store");

    // Two watched wallets buy the same outcome at 0.40.
    store.insert_event(&fill("e1", W1, 100, Side::Buy, 125.0, 50.0)).unwrap();
    store.insert_event(&fill("e2", W2, 101, Side::Buy, 125.0, 50.0)).unwrap();

    let log = Arc::new(LogStore::new());
    let alerts = Arc::new(AlertStore::new());
    let positions = Arc::new(PositionStore::new());
    let exits = Arc::new(WalletExitRegistry::new());

    // Mark path for the monitor: two quiet ticks, then through the +20%
    // default target (0.40 -> 0.48).
    let source = Arc::new(ScriptedPrices {
        marks: Mutex::new([0.42, 0.45, 0.49].into_iter().collect()),
    });
    let monitor = Arc::new(PriceMonitor::new(
        MonitorConfig::default(),
        Arc::clone(&positions),
        Arc::clone(&alerts),
        source,
        Arc::clone(&exits),
    ));

    let engine = Arc::new(
        CopyTradeEngine::new(
            CopyTradeConfig {
                consensus_mode: ConsensusMode::TwoAgree,
                min_source_notional_usd: 10.0,
                max_copy_per_trade_usd: 100.0,
                ..Default::default()
            },
            &[W1.to_string(), W2.to_string()],
            None,
            Arc::new(DryRunAdapter),
            Arc::clone(&log),
            Arc::clone(&alerts),
            Arc::clone(&positions),
            Arc::clone(&exits),
            Arc::clone(&monitor),
        )
        .expect("build engine"),
    );

    // Drain the stream: first event waits, second triggers.
    let mut cursor = IngressCursor::default();
    let fed = poll_once(&store, &engine, &mut cursor).await.unwrap();
    assert_eq!(fed, 2);

    let decisions = log.recent(10);
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[0].status, DecisionStatus::Simulated);
    assert_eq!(decisions[1].status, DecisionStatus::Skipped);

    // Re-polling feeds nothing new and changes nothing.
    let fed_again = poll_once(&store, &engine, &mut cursor).await.unwrap();
    assert_eq!(fed_again, 0);
    assert_eq!(log.len(), 2);

    let open = positions.by_status(Some(PositionStatus::Open));
    assert_eq!(open.len(), 1);
    let position = &open[0];
    assert_eq!(position.condition_id, "0xc0ffee");
    assert!((position.entry_price - 0.40).abs() < 1e-9);
    assert_eq!(position.exit_rules.len(), 2);

    // Consensus and position-opened alerts are already in the store.
    assert_eq!(alerts.recent(10).len(), 2);

    // Drive the monitor to the target.
    monitor.run_tick().await;
    monitor.run_tick().await;
    assert_eq!(
        positions.get(&position.id).unwrap().status,
        PositionStatus::Open
    );

    monitor.run_tick().await;
    let closed = positions.get(&position.id).unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason.as_deref(), Some("price_target"));
    let realized = closed.realized_pnl.unwrap();
    // (0.49 - 0.40) * (50 / 0.40) tokens.
    assert!((realized - 11.25).abs() < 1e-6, "realized {}", realized);

    let exit_alerts: Vec<_> = alerts
        .recent(10)
        .into_iter()
        .filter(|a| a.kind == AlertKind::ExitTriggered)
        .collect();
    assert_eq!(exit_alerts.len(), 1);
    assert_eq!(exit_alerts[0].position_id.as_deref(), Some(&*closed.id));

    let status = monitor.status();
    assert_eq!(status.exits_triggered, 1);
    assert_eq!(status.checks_performed, 3);

    // The same store serves the PnL engine: both wallets hold an open long
    // marked at the default 0.5.
    let report = compute_wallet_pnl(&store, W1, &PnlOptions::default()).unwrap();
    assert_eq!(report.diagnostics.cohort, Cohort::ClobActive);
    assert!((report.unrealized - 12.5).abs() < 1e-6);
    assert!((report.position_value - 62.5).abs() < 1e-6);
}
