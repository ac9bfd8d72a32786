//! Consensus tracking and decision emission.
//!
//! The engine is the single writer of its tracker map. Decisions are
//! computed under the state lock; the only suspension point is the adapter
//! call, which happens after the trigger has been committed so the
//! single-shot guarantee holds regardless of adapter latency.

use crate::copytrade::execution::{ExecutionAdapter, ExecutionRequest};
use crate::copytrade::monitor::PriceMonitor;
use crate::copytrade::WalletExitRegistry;
use crate::models::{
    AlertKind, AlertPriority, Decision, DecisionStatus, ExitRule, PaperPosition, PositionStatus,
    Side, SourceType, TradeEvent,
};
use crate::stores::{AlertStore, LogStore, PositionStore};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusMode {
    Any,
    TwoAgree,
    NOfM,
    All,
}

impl ConsensusMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Some(ConsensusMode::Any),
            "two_agree" => Some(ConsensusMode::TwoAgree),
            "n_of_m" => Some(ConsensusMode::NOfM),
            "all" => Some(ConsensusMode::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyTradeConfig {
    pub consensus_mode: ConsensusMode,
    /// Used iff mode is `n_of_m`.
    pub n_required: usize,
    pub min_source_notional_usd: f64,
    pub max_copy_per_trade_usd: f64,
    pub dry_run: bool,
    /// Persist non-executing decisions to the log store.
    pub enable_logging: bool,
    pub default_price_target_pct: f64,
    pub default_stop_loss_pct: f64,
}

impl Default for CopyTradeConfig {
    fn default() -> Self {
        Self {
            consensus_mode: ConsensusMode::TwoAgree,
            n_required: 2,
            min_source_notional_usd: 100.0,
            max_copy_per_trade_usd: 50.0,
            dry_run: true,
            enable_logging: true,
            default_price_target_pct: 20.0,
            default_stop_loss_pct: 10.0,
        }
    }
}

/// Consensus state for one `condition:side:outcome` key.
#[derive(Debug, Clone)]
pub struct MarketTracker {
    pub consensus_key: String,
    pub condition_id: String,
    pub market_id: String,
    pub side: Side,
    pub outcome: String,
    /// First qualifying event per wallet.
    pub wallets_that_bet: HashMap<String, TradeEvent>,
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct EngineState {
    trackers: HashMap<String, MarketTracker>,
    seen_trade_ids: HashSet<String>,
}

pub struct CopyTradeEngine {
    config: CopyTradeConfig,
    /// Canonical watch list: lowercased, deduped, hex-validated.
    wallets: Vec<String>,
    wallet_set: HashSet<String>,
    condition_allowlist: Option<HashSet<String>>,
    state: Mutex<EngineState>,
    adapter: Arc<dyn ExecutionAdapter>,
    log: Arc<LogStore>,
    alerts: Arc<AlertStore>,
    positions: Arc<PositionStore>,
    exits: Arc<WalletExitRegistry>,
    monitor: Arc<PriceMonitor>,
    running: AtomicBool,
}

fn validate_wallet(raw: &str) -> Result<String> {
    let wallet = raw.trim().to_lowercase();
    let Some(body) = wallet.strip_prefix("0x") else {
        bail!("wallet {} is not 0x-prefixed", raw);
    };
    if body.is_empty() || hex::decode(body).is_err() {
        bail!("wallet {} is not valid hex", raw);
    }
    Ok(wallet)
}

fn outcome_label(outcome_index: u32) -> String {
    match outcome_index {
        0 => "yes".to_string(),
        1 => "no".to_string(),
        n => n.to_string(),
    }
}

impl CopyTradeEngine {
    pub fn new(
        config: CopyTradeConfig,
        source_wallets: &[String],
        condition_allowlist: Option<HashSet<String>>,
        adapter: Arc<dyn ExecutionAdapter>,
        log: Arc<LogStore>,
        alerts: Arc<AlertStore>,
        positions: Arc<PositionStore>,
        exits: Arc<WalletExitRegistry>,
        monitor: Arc<PriceMonitor>,
    ) -> Result<Self> {
        if source_wallets.is_empty() {
            bail!("no source wallets configured");
        }
        if config.consensus_mode == ConsensusMode::NOfM && config.n_required == 0 {
            bail!("n_of_m consensus requires n_required >= 1");
        }

        let mut wallets = Vec::new();
        let mut wallet_set = HashSet::new();
        for raw in source_wallets {
            let wallet = validate_wallet(raw)?;
            if wallet_set.insert(wallet.clone()) {
                wallets.push(wallet);
            }
        }

        let condition_allowlist = condition_allowlist
            .map(|set| set.into_iter().map(|c| c.to_lowercase()).collect());

        Ok(Self {
            config,
            wallets,
            wallet_set,
            condition_allowlist,
            state: Mutex::new(EngineState::default()),
            adapter,
            log,
            alerts,
            positions,
            exits,
            monitor,
            running: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &CopyTradeConfig {
        &self.config
    }

    pub fn watched_wallets(&self) -> &[String] {
        &self.wallets
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    /// Wallets needed for consensus under the configured mode.
    pub fn required_count(&self) -> usize {
        match self.config.consensus_mode {
            ConsensusMode::Any => 1,
            ConsensusMode::TwoAgree => 2,
            ConsensusMode::NOfM => self.config.n_required,
            ConsensusMode::All => self.wallets.len(),
        }
    }

    pub fn tracker(&self, consensus_key: &str) -> Option<MarketTracker> {
        self.state.lock().trackers.get(consensus_key).cloned()
    }

    pub fn tracker_count(&self) -> usize {
        self.state.lock().trackers.len()
    }

    /// Process one ingress event. Returns the emitted decision, or None for
    /// the silent drops (unwatched wallet, non-book event, duplicate id).
    pub async fn process_trade_event(&self, event: &TradeEvent) -> Result<Option<Decision>> {
        if !self.is_running() {
            return Ok(None);
        }
        // Only priced order-book fills drive consensus.
        if event.source_type != SourceType::Clob {
            return Ok(None);
        }
        let (Some(outcome_index), Some(price)) = (event.outcome_index, event.price()) else {
            return Ok(None);
        };

        let wallet = event.wallet_address.to_lowercase();
        if !self.wallet_set.contains(&wallet) {
            return Ok(None);
        }

        let condition_id = event.condition_id.to_lowercase();
        let outcome = outcome_label(outcome_index);

        // Feed the wallet-exit registry before any filtering; an exit signal
        // is an exit signal even when the event fails consensus gates.
        if event.side == Side::Sell {
            self.exits.record_sell(&condition_id, &outcome, &wallet);
        }

        if let Some(allowlist) = &self.condition_allowlist {
            if !allowlist.contains(&condition_id) {
                let decision = self.build_decision(
                    event,
                    &wallet,
                    vec![wallet.clone()],
                    &condition_id,
                    &outcome,
                    price,
                    DecisionStatus::Filtered,
                    Some("market_not_in_filter".to_string()),
                );
                self.record(&decision);
                return Ok(Some(decision));
            }
        }

        if event.usdc < self.config.min_source_notional_usd {
            let decision = self.build_decision(
                event,
                &wallet,
                vec![wallet.clone()],
                &condition_id,
                &outcome,
                price,
                DecisionStatus::Filtered,
                Some("notional_below_min".to_string()),
            );
            self.record(&decision);
            return Ok(Some(decision));
        }

        let consensus_key = format!("{}:{}:{}", condition_id, event.side.as_str(), outcome);
        let required = self.required_count();

        // All tracker mutations happen here; the lock is dropped before the
        // adapter call.
        enum Verdict {
            Drop,
            Skip(String, Vec<String>),
            Trigger(Vec<String>),
        }

        let verdict = {
            let mut state = self.state.lock();

            if !state.seen_trade_ids.insert(event.event_id.clone()) {
                Verdict::Drop
            } else {
                let tracker = state
                    .trackers
                    .entry(consensus_key.clone())
                    .or_insert_with(|| MarketTracker {
                        consensus_key: consensus_key.clone(),
                        condition_id: condition_id.clone(),
                        market_id: event
                            .token_id
                            .clone()
                            .unwrap_or_else(|| condition_id.clone()),
                        side: event.side,
                        outcome: outcome.clone(),
                        wallets_that_bet: HashMap::new(),
                        triggered: false,
                        triggered_at: None,
                    });

                if tracker.wallets_that_bet.contains_key(&wallet) {
                    Verdict::Skip(
                        "wallet_already_counted".to_string(),
                        tracker.sorted_wallets(),
                    )
                } else {
                    tracker.wallets_that_bet.insert(wallet.clone(), event.clone());

                    if tracker.triggered {
                        Verdict::Skip(
                            "already_triggered_for_this_market".to_string(),
                            tracker.sorted_wallets(),
                        )
                    } else {
                        let unique_wallets = tracker.wallets_that_bet.len();
                        if unique_wallets >= required {
                            tracker.triggered = true;
                            tracker.triggered_at = Some(Utc::now());
                            Verdict::Trigger(tracker.sorted_wallets())
                        } else {
                            Verdict::Skip(
                                format!("waiting_for_consensus: {}/{}", unique_wallets, required),
                                tracker.sorted_wallets(),
                            )
                        }
                    }
                }
            }
        };

        match verdict {
            Verdict::Drop => Ok(None),
            Verdict::Skip(reason, matched) => {
                let decision = self.build_decision(
                    event,
                    &wallet,
                    matched,
                    &condition_id,
                    &outcome,
                    price,
                    DecisionStatus::Skipped,
                    Some(reason),
                );
                self.record(&decision);
                Ok(Some(decision))
            }
            Verdict::Trigger(matched) => {
                let decision = self
                    .execute_trigger(event, &wallet, matched, &condition_id, &outcome, price)
                    .await;
                Ok(Some(decision))
            }
        }
    }

    async fn execute_trigger(
        &self,
        event: &TradeEvent,
        wallet: &str,
        matched: Vec<String>,
        condition_id: &str,
        outcome: &str,
        price: f64,
    ) -> Decision {
        let request = ExecutionRequest {
            condition_id: condition_id.to_string(),
            market_id: event
                .token_id
                .clone()
                .unwrap_or_else(|| condition_id.to_string()),
            side: event.side,
            outcome: outcome.to_string(),
            price,
            size_usd: event.usdc,
            max_copy_per_trade_usd: self.config.max_copy_per_trade_usd,
        };

        let outcome_result = self.adapter.execute(&request).await;
        let status = outcome_result.status();
        let reason = outcome_result.reason();

        let decision = self.build_decision(
            event,
            wallet,
            matched.clone(),
            condition_id,
            outcome,
            price,
            status,
            reason,
        );
        self.record(&decision);

        if status.is_fill() {
            info!(
                "consensus fill on {}: {} wallets agree, {} ${:.2} @ {:.4}",
                decision.condition_id,
                matched.len(),
                decision.side.as_str(),
                decision.size_usd,
                decision.price
            );
            self.open_paper_position(event, &decision);
            self.emit_consensus_alerts(&decision, &matched);
            self.monitor.ensure_running();
        } else {
            debug!(
                "consensus on {} did not fill: {:?} {:?}",
                decision.condition_id, decision.status, decision.reason
            );
        }

        decision
    }

    fn open_paper_position(&self, event: &TradeEvent, decision: &Decision) {
        let tokens = if decision.price > 0.0 {
            decision.size_usd / decision.price
        } else {
            0.0
        };
        let position = PaperPosition {
            id: Uuid::new_v4().to_string(),
            decision_id: decision.id.clone(),
            source_event_id: event.event_id.clone(),
            condition_id: decision.condition_id.clone(),
            market_id: decision.market_id.clone(),
            side: decision.side,
            outcome: decision.outcome.clone(),
            entry_price: decision.price,
            size_usd: decision.size_usd,
            tokens,
            current_price: decision.price,
            high_watermark: decision.price,
            unrealized_pnl: 0.0,
            realized_pnl: None,
            exit_price: None,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            exit_reason: None,
            exit_rules: Vec::new(),
        };
        let position_id = position.id.clone();
        self.positions.insert(position);

        // Default exits: target above entry, stop below, in that order.
        let target = decision.price * (1.0 + self.config.default_price_target_pct / 100.0);
        let stop = decision.price * (1.0 - self.config.default_stop_loss_pct / 100.0);
        self.positions
            .attach_exit_rule(&position_id, ExitRule::PriceTarget { price: target });
        self.positions
            .attach_exit_rule(&position_id, ExitRule::StopLoss { price: stop });

        self.alerts.emit(
            AlertKind::PositionOpened,
            AlertPriority::Medium,
            "Paper position opened",
            format!(
                "{} {} on {} at {:.4} (${:.2})",
                decision.side.as_str(),
                decision.outcome,
                decision.condition_id,
                decision.price,
                decision.size_usd
            ),
            Some(decision.condition_id.clone()),
            Some(position_id),
            Some(decision.id.clone()),
        );
    }

    fn emit_consensus_alerts(&self, decision: &Decision, matched: &[String]) {
        self.alerts.emit(
            AlertKind::ConsensusTriggered,
            AlertPriority::High,
            "Consensus triggered",
            format!(
                "{} wallet(s) agree on {} {} {}",
                matched.len(),
                decision.condition_id,
                decision.side.as_str(),
                decision.outcome
            ),
            Some(decision.condition_id.clone()),
            None,
            Some(decision.id.clone()),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn build_decision(
        &self,
        event: &TradeEvent,
        wallet: &str,
        matched_wallets: Vec<String>,
        condition_id: &str,
        outcome: &str,
        price: f64,
        status: DecisionStatus,
        reason: Option<String>,
    ) -> Decision {
        Decision {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source_wallet: wallet.to_string(),
            matched_wallets,
            condition_id: condition_id.to_string(),
            market_id: event
                .token_id
                .clone()
                .unwrap_or_else(|| condition_id.to_string()),
            side: event.side,
            outcome: outcome.to_string(),
            price,
            size_usd: event.usdc,
            status,
            reason,
            dry_run: self.adapter.is_dry_run(),
        }
    }

    fn record(&self, decision: &Decision) {
        if self.config.enable_logging {
            self.log.insert(decision.clone());
        }
    }
}

impl MarketTracker {
    fn sorted_wallets(&self) -> Vec<String> {
        let mut wallets: Vec<String> = self.wallets_that_bet.keys().cloned().collect();
        wallets.sort();
        wallets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copytrade::execution::DryRunAdapter;
    use crate::copytrade::monitor::{MonitorConfig, PriceMonitor};
    use crate::marketdata::PriceSource;
    use crate::models::TradeRole;
    use async_trait::async_trait;

    struct NoPrices;

    #[async_trait]
    impl PriceSource for NoPrices {
        async fn price(&self, _condition_id: &str, _outcome: &str) -> Option<f64> {
            None
        }
    }

    fn engine_with(config: CopyTradeConfig, wallets: &[&str]) -> Arc<CopyTradeEngine> {
        let log = Arc::new(LogStore::new());
        let alerts = Arc::new(AlertStore::new());
        let positions = Arc::new(PositionStore::new());
        let exits = Arc::new(WalletExitRegistry::new());
        let monitor = Arc::new(PriceMonitor::new(
            MonitorConfig::default(),
            Arc::clone(&positions),
            Arc::clone(&alerts),
            Arc::new(NoPrices),
            Arc::clone(&exits),
        ));
        let wallets: Vec<String> = wallets.iter().map(|w| w.to_string()).collect();
        Arc::new(
            CopyTradeEngine::new(
                config,
                &wallets,
                None,
                Arc::new(DryRunAdapter),
                log,
                alerts,
                positions,
                exits,
                monitor,
            )
            .unwrap(),
        )
    }

    fn fill(id: &str, wallet: &str, condition: &str, outcome: u32, side: Side, usdc: f64) -> TradeEvent {
        TradeEvent {
            event_id: id.to_string(),
            wallet_address: wallet.to_string(),
            tx_hash: format!("0xtx{}", id),
            block_number: 1,
            timestamp: Utc::now(),
            condition_id: condition.to_string(),
            outcome_index: Some(outcome),
            token_id: None,
            side,
            role: TradeRole::Taker,
            tokens: usdc / 0.40,
            usdc,
            source_type: SourceType::Clob,
        }
    }

    const W1: &str = "0x1111111111111111111111111111111111111111";
    const W2: &str = "0x2222222222222222222222222222222222222222";
    const W3: &str = "0x3333333333333333333333333333333333333333";

    fn default_config() -> CopyTradeConfig {
        CopyTradeConfig {
            min_source_notional_usd: 10.0,
            max_copy_per_trade_usd: 1000.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn two_agree_triggers_on_second_matching_wallet() {
        let engine = engine_with(default_config(), &[W1, W2, W3]);

        // w1 buys YES, w2 buys NO, w3 buys YES: the YES key reaches 2.
        let d1 = engine
            .process_trade_event(&fill("e1", W1, "0xC1", 0, Side::Buy, 100.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d1.status, DecisionStatus::Skipped);
        assert_eq!(d1.reason.as_deref(), Some("waiting_for_consensus: 1/2"));

        let d2 = engine
            .process_trade_event(&fill("e2", W2, "0xC1", 1, Side::Buy, 100.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d2.reason.as_deref(), Some("waiting_for_consensus: 1/2"));

        let d3 = engine
            .process_trade_event(&fill("e3", W3, "0xC1", 0, Side::Buy, 100.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d3.status, DecisionStatus::Simulated);
        assert_eq!(d3.matched_wallets.len(), 2);

        // A later YES buy from any watched wallet is a single-shot skip.
        let d4 = engine
            .process_trade_event(&fill("e4", W2, "0xC1", 0, Side::Buy, 100.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d4.status, DecisionStatus::Skipped);
        assert_eq!(
            d4.reason.as_deref(),
            Some("already_triggered_for_this_market")
        );
    }

    #[tokio::test]
    async fn unwatched_wallets_and_duplicates_drop_silently() {
        let engine = engine_with(default_config(), &[W1, W2]);

        let unwatched = engine
            .process_trade_event(&fill("e1", W3, "0xC1", 0, Side::Buy, 100.0))
            .await
            .unwrap();
        assert!(unwatched.is_none());

        let first = engine
            .process_trade_event(&fill("e2", W1, "0xC1", 0, Side::Buy, 100.0))
            .await
            .unwrap();
        assert!(first.is_some());

        let duplicate = engine
            .process_trade_event(&fill("e2", W1, "0xC1", 0, Side::Buy, 100.0))
            .await
            .unwrap();
        assert!(duplicate.is_none());
        assert_eq!(engine.tracker_count(), 1);
    }

    #[tokio::test]
    async fn same_wallet_counts_once_per_key() {
        let engine = engine_with(default_config(), &[W1, W2]);

        engine
            .process_trade_event(&fill("e1", W1, "0xC1", 0, Side::Buy, 100.0))
            .await
            .unwrap();
        let repeat = engine
            .process_trade_event(&fill("e2", W1, "0xC1", 0, Side::Buy, 150.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repeat.status, DecisionStatus::Skipped);
        assert_eq!(repeat.reason.as_deref(), Some("wallet_already_counted"));
    }

    #[tokio::test]
    async fn notional_filter_emits_filtered_decision() {
        let engine = engine_with(default_config(), &[W1, W2]);
        let decision = engine
            .process_trade_event(&fill("e1", W1, "0xC1", 0, Side::Buy, 5.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision.status, DecisionStatus::Filtered);
        assert_eq!(decision.reason.as_deref(), Some("notional_below_min"));
        // Filtered events never enter the tracker.
        assert_eq!(engine.tracker_count(), 0);
    }

    #[tokio::test]
    async fn allowlist_filters_foreign_markets() {
        let log = Arc::new(LogStore::new());
        let alerts = Arc::new(AlertStore::new());
        let positions = Arc::new(PositionStore::new());
        let exits = Arc::new(WalletExitRegistry::new());
        let monitor = Arc::new(PriceMonitor::new(
            MonitorConfig::default(),
            Arc::clone(&positions),
            Arc::clone(&alerts),
            Arc::new(NoPrices),
            Arc::clone(&exits),
        ));
        let mut allow = HashSet::new();
        allow.insert("0xallowed".to_string());
        let engine = CopyTradeEngine::new(
            default_config(),
            &[W1.to_string()],
            Some(allow),
            Arc::new(DryRunAdapter),
            log,
            alerts,
            positions,
            exits,
            monitor,
        )
        .unwrap();

        let decision = engine
            .process_trade_event(&fill("e1", W1, "0xother", 0, Side::Buy, 100.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision.status, DecisionStatus::Filtered);
        assert_eq!(decision.reason.as_deref(), Some("market_not_in_filter"));
    }

    #[tokio::test]
    async fn fill_opens_position_with_default_exits_and_alerts() {
        let config = CopyTradeConfig {
            consensus_mode: ConsensusMode::Any,
            ..default_config()
        };
        let engine = engine_with(config, &[W1]);

        let decision = engine
            .process_trade_event(&fill("e1", W1, "0xC1", 0, Side::Buy, 100.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision.status, DecisionStatus::Simulated);
        assert!(decision.dry_run);

        let positions = engine.positions.by_status(Some(PositionStatus::Open));
        assert_eq!(positions.len(), 1);
        let p = &positions[0];
        assert_eq!(p.exit_rules.len(), 2);
        assert_eq!(p.exit_rules[0].rule.kind(), "price_target");
        match &p.exit_rules[0].rule {
            ExitRule::PriceTarget { price } => assert!((price - p.entry_price * 1.2).abs() < 1e-9),
            other => panic!("unexpected rule {:?}", other),
        }
        match &p.exit_rules[1].rule {
            ExitRule::StopLoss { price } => assert!((price - p.entry_price * 0.9).abs() < 1e-9),
            other => panic!("unexpected rule {:?}", other),
        }

        let alerts = engine.alerts.recent(10);
        assert_eq!(alerts.len(), 2);
        assert!(engine.monitor.status().running);
    }

    #[tokio::test]
    async fn single_shot_holds_across_many_wallets() {
        let config = CopyTradeConfig {
            consensus_mode: ConsensusMode::TwoAgree,
            ..default_config()
        };
        let engine = engine_with(config, &[W1, W2, W3]);

        let mut fills = 0;
        for (i, wallet) in [W1, W2, W3, W1, W2, W3].iter().enumerate() {
            if let Some(d) = engine
                .process_trade_event(&fill(
                    &format!("e{}", i),
                    wallet,
                    "0xC1",
                    0,
                    Side::Buy,
                    100.0,
                ))
                .await
                .unwrap()
            {
                if d.status.is_fill() {
                    fills += 1;
                }
            }
        }
        assert_eq!(fills, 1);
    }

    #[tokio::test]
    async fn watched_sells_feed_the_exit_registry() {
        let engine = engine_with(default_config(), &[W1, W2]);
        let before = Utc::now();
        engine
            .process_trade_event(&fill("e1", W1, "0xC1", 0, Side::Sell, 100.0))
            .await
            .unwrap();
        assert!(engine
            .exits
            .sold_since("0xc1", "yes", &[W1.to_string()], before));
        assert!(!engine
            .exits
            .sold_since("0xc1", "yes", &[W2.to_string()], before));
    }

    #[test]
    fn invalid_wallets_are_a_construction_error() {
        let log = Arc::new(LogStore::new());
        let alerts = Arc::new(AlertStore::new());
        let positions = Arc::new(PositionStore::new());
        let exits = Arc::new(WalletExitRegistry::new());
        let monitor = Arc::new(PriceMonitor::new(
            MonitorConfig::default(),
            Arc::clone(&positions),
            Arc::clone(&alerts),
            Arc::new(NoPrices),
            Arc::clone(&exits),
        ));
        let result = CopyTradeEngine::new(
            CopyTradeConfig::default(),
            &["not-a-wallet".to_string()],
            None,
            Arc::new(DryRunAdapter),
            log,
            alerts,
            positions,
            exits,
            monitor,
        );
        assert!(result.is_err());
    }

    #[test]
    fn required_count_follows_the_mode() {
        let any = engine_with(
            CopyTradeConfig {
                consensus_mode: ConsensusMode::Any,
                ..default_config()
            },
            &[W1, W2, W3],
        );
        assert_eq!(any.required_count(), 1);

        let all = engine_with(
            CopyTradeConfig {
                consensus_mode: ConsensusMode::All,
                ..default_config()
            },
            &[W1, W2, W3],
        );
        assert_eq!(all.required_count(), 3);

        let n_of_m = engine_with(
            CopyTradeConfig {
                consensus_mode: ConsensusMode::NOfM,
                n_required: 2,
                ..default_config()
            },
            &[W1, W2, W3],
        );
        assert_eq!(n_of_m.required_count(), 2);
    }
}
