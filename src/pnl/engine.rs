//! Ledger replay and report construction.

use crate::ledger::{from_amount, to_amount, Amount, LedgerPosition, Lineage};
use crate::models::{Side, SourceType, TradeEvent};
use crate::olap::EventStore;
use crate::pnl::assembly::{assemble_wallet_events, SPLIT_COST_PRICE};
use anyhow::Result;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

/// Default mark for open positions with no supplied price.
pub const DEFAULT_MARK: f64 = 0.5;

const BATCH_CONCURRENCY: usize = 8;

/// Wallet classification. Governs the confidence signal of the report; the
/// computation itself is uniform across cohorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cohort {
    NoData,
    ClobClosed,
    ClobActive,
    Mixed,
}

#[derive(Debug, Clone, Default)]
pub struct PnlOptions {
    /// Mark overrides per condition id (lowercase), 0..=1.
    pub price_overrides: HashMap<String, f64>,
    pub cohort_override: Option<Cohort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlDiagnostics {
    pub cohort: Cohort,
    pub clob_count: usize,
    pub non_clob_count: usize,
    pub resolved_positions: usize,
    pub active_positions: usize,
    /// Conditions marked at the default because no price input was supplied.
    pub omega_inputs_missing: Vec<String>,
    pub warnings: Vec<String>,
    pub sell_deficit_no_mapping: u32,
    pub redeem_deficit_no_split_evidence: u32,
    pub implicit_split_from_trades: u32,
    /// Total tokens minted by implicit splits.
    pub implicit_split_tokens: f64,
    pub synthetic_pairs_removed: usize,
    pub funding_skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletPnlReport {
    pub wallet: String,
    pub realized: f64,
    pub unrealized: f64,
    pub total: f64,
    pub position_value: f64,
    pub diagnostics: PnlDiagnostics,
}

struct Replay<'a> {
    store: &'a EventStore,
    positions: BTreeMap<(String, u32), LedgerPosition>,
    outcome_sets: HashMap<String, Option<Vec<u32>>>,
    tx_sides: HashMap<String, (bool, bool)>,
    split_price: Amount,
    diagnostics: PnlDiagnostics,
}

impl<'a> Replay<'a> {
    fn new(store: &'a EventStore, cohort: Cohort) -> Self {
        Self {
            store,
            positions: BTreeMap::new(),
            outcome_sets: HashMap::new(),
            tx_sides: HashMap::new(),
            split_price: to_amount(SPLIT_COST_PRICE),
            diagnostics: PnlDiagnostics {
                cohort,
                clob_count: 0,
                non_clob_count: 0,
                resolved_positions: 0,
                active_positions: 0,
                omega_inputs_missing: Vec::new(),
                warnings: Vec::new(),
                sell_deficit_no_mapping: 0,
                redeem_deficit_no_split_evidence: 0,
                implicit_split_from_trades: 0,
                implicit_split_tokens: 0.0,
                synthetic_pairs_removed: 0,
                funding_skipped: 0,
            },
        }
    }

    /// Outcome indices of a condition: the token map when it knows the
    /// condition, otherwise the indices observed in the event stream when at
    /// least two are present. `None` means minting cannot be placed.
    fn outcome_set(&mut self, condition_id: &str, observed: &HashMap<String, Vec<u32>>) -> Option<Vec<u32>> {
        if let Some(cached) = self.outcome_sets.get(condition_id) {
            return cached.clone();
        }
        let mapped = self
            .store
            .outcomes_for_condition(condition_id)
            .unwrap_or_default();
        let resolved = if mapped.len() >= 2 {
            Some(mapped)
        } else {
            match observed.get(condition_id) {
                Some(seen) if seen.len() >= 2 => Some(seen.clone()),
                _ => None,
            }
        };
        self.outcome_sets
            .insert(condition_id.to_string(), resolved.clone());
        resolved
    }

    fn position(&mut self, condition_id: &str, outcome: u32) -> &mut LedgerPosition {
        self.positions
            .entry((condition_id.to_string(), outcome))
            .or_default()
    }

    fn net_inventory(&self) -> Amount {
        self.positions.values().map(|p| p.amount).sum()
    }

    /// Mixed buy-and-sell behaviour in the event's transaction, or a
    /// net-short book overall: the signals that a sell deficit came from an
    /// untracked split rather than an intentional short.
    fn deficit_evidence(&self, tx_hash: &str) -> bool {
        let mixed = self
            .tx_sides
            .get(tx_hash)
            .map(|(buys, sells)| *buys && *sells)
            .unwrap_or(false);
        mixed || self.net_inventory() < 0
    }

    fn impute_split(
        &mut self,
        condition_id: &str,
        outcomes: &[u32],
        deficit: Amount,
    ) {
        for &outcome in outcomes {
            let price = self.split_price;
            self.position(condition_id, outcome)
                .apply_buy(deficit, price, Lineage::Split);
        }
        self.diagnostics.implicit_split_from_trades += 1;
        self.diagnostics.implicit_split_tokens += from_amount(deficit);
    }

    fn consume(
        &mut self,
        event: &TradeEvent,
        outcome: u32,
        qty: Amount,
        price: Amount,
        observed: &HashMap<String, Vec<u32>>,
        is_redemption: bool,
    ) {
        let held = self.position(&event.condition_id, outcome).amount.max(0);
        let deficit = qty - held;
        if deficit > 0 {
            match self.outcome_set(&event.condition_id, observed) {
                Some(outcomes) if self.deficit_evidence(&event.tx_hash) => {
                    self.impute_split(&event.condition_id, &outcomes, deficit);
                }
                Some(_) => {
                    if is_redemption {
                        self.diagnostics.redeem_deficit_no_split_evidence += 1;
                    }
                }
                None => {
                    if is_redemption {
                        self.diagnostics.redeem_deficit_no_split_evidence += 1;
                    } else {
                        self.diagnostics.sell_deficit_no_mapping += 1;
                    }
                }
            }
        }
        self.position(&event.condition_id, outcome)
            .apply_sell(qty, price);
    }

    fn apply(&mut self, event: &TradeEvent, observed: &HashMap<String, Vec<u32>>) {
        let qty = to_amount(event.tokens);
        match event.source_type {
            SourceType::Clob => {
                let Some(price) = event.price() else {
                    self.diagnostics
                        .warnings
                        .push(format!("fill {} has no token amount", event.event_id));
                    return;
                };
                let Some(outcome) = event.outcome_index else {
                    self.diagnostics
                        .warnings
                        .push(format!("fill {} has no outcome index", event.event_id));
                    return;
                };
                let price = to_amount(price);
                match event.side {
                    Side::Buy => {
                        self.position(&event.condition_id, outcome)
                            .apply_buy(qty, price, Lineage::Clob);
                    }
                    Side::Sell => {
                        self.consume(event, outcome, qty, price, observed, false);
                    }
                }
            }
            SourceType::PositionSplit => {
                let Some(outcomes) = self.outcome_set(&event.condition_id, observed) else {
                    self.diagnostics.warnings.push(format!(
                        "split {} on unmapped condition {}",
                        event.event_id, event.condition_id
                    ));
                    return;
                };
                let per_leg = to_amount(1.0 / outcomes.len() as f64);
                for outcome in outcomes {
                    self.position(&event.condition_id, outcome)
                        .apply_buy(qty, per_leg, Lineage::Split);
                }
            }
            SourceType::PositionsMerge => {
                let Some(outcomes) = self.outcome_set(&event.condition_id, observed) else {
                    self.diagnostics.warnings.push(format!(
                        "merge {} on unmapped condition {}",
                        event.event_id, event.condition_id
                    ));
                    return;
                };
                let per_leg = to_amount(1.0 / outcomes.len() as f64);
                for outcome in outcomes {
                    self.position(&event.condition_id, outcome)
                        .apply_sell(qty, per_leg);
                }
            }
            SourceType::PayoutRedemption => {
                let Some(outcome) = event.outcome_index else {
                    self.diagnostics.warnings.push(format!(
                        "redemption {} has no outcome leg",
                        event.event_id
                    ));
                    return;
                };
                if event.tokens <= 0.0 {
                    return;
                }
                let price = to_amount(event.usdc / event.tokens);
                self.consume(event, outcome, qty, price, observed, true);
            }
            SourceType::Erc1155Transfer => {
                let Some(outcome) = event.outcome_index else {
                    self.diagnostics
                        .warnings
                        .push(format!("transfer {} has no outcome index", event.event_id));
                    return;
                };
                let price = self.split_price;
                self.position(&event.condition_id, outcome)
                    .apply_buy(qty, price, Lineage::Split);
            }
            SourceType::Deposit | SourceType::Withdrawal => {}
        }
    }
}

/// Reconstruct realized and unrealized PnL for one wallet.
///
/// Deterministic: identical inputs and options produce bit-identical output.
/// Input-data faults are recorded as diagnostics and never abort the
/// computation.
pub fn compute_wallet_pnl(
    store: &EventStore,
    wallet: &str,
    options: &PnlOptions,
) -> Result<WalletPnlReport> {
    let wallet = wallet.to_lowercase();
    let assembled = assemble_wallet_events(store, &wallet)?;

    let mut cohort = if assembled.events.is_empty() {
        Cohort::NoData
    } else if assembled.non_clob_count > 0 {
        Cohort::Mixed
    } else {
        // Refined to ClobActive after replay when open positions remain.
        Cohort::ClobClosed
    };

    // Observed outcome indices per condition, as the token-map fallback.
    let mut observed: HashMap<String, Vec<u32>> = HashMap::new();
    for event in &assembled.events {
        if let Some(outcome) = event.outcome_index {
            let entry = observed.entry(event.condition_id.clone()).or_default();
            if !entry.contains(&outcome) {
                entry.push(outcome);
            }
        }
    }
    // Per-tx side evidence over order-book fills.
    let mut tx_sides: HashMap<String, (bool, bool)> = HashMap::new();
    for event in &assembled.events {
        if event.source_type == SourceType::Clob {
            let entry = tx_sides.entry(event.tx_hash.clone()).or_default();
            match event.side {
                Side::Buy => entry.0 = true,
                Side::Sell => entry.1 = true,
            }
        }
    }

    let mut replay = Replay::new(store, cohort);
    replay.tx_sides = tx_sides;
    replay.diagnostics.synthetic_pairs_removed = assembled.synthetic_pairs_removed;
    replay.diagnostics.funding_skipped = assembled.funding_skipped;
    replay.diagnostics.warnings.extend(assembled.warnings);

    for event in &assembled.events {
        replay.apply(event, &observed);
    }

    // Settle resolved conditions, mark the rest.
    let resolutions = store.resolutions()?;
    let mut unrealized: Amount = 0;
    let mut position_value: Amount = 0;
    let mut missing_marks: HashSet<String> = HashSet::new();

    for ((condition_id, outcome), pos) in replay.positions.iter_mut() {
        if let Some(resolution) = resolutions.get(condition_id) {
            let payout = match resolution.payout_for(*outcome) {
                Some(p) => p,
                None => {
                    replay.diagnostics.warnings.push(format!(
                        "resolution for {} has no payout at index {}",
                        condition_id, outcome
                    ));
                    0.0
                }
            };
            pos.settle(to_amount(payout));
            replay.diagnostics.resolved_positions += 1;
        } else if !pos.is_flat() {
            let mark = options
                .price_overrides
                .get(condition_id.as_str())
                .copied()
                .unwrap_or_else(|| {
                    missing_marks.insert(condition_id.clone());
                    DEFAULT_MARK
                });
            let mark = to_amount(mark);
            unrealized += pos.unrealized(mark);
            position_value += pos.position_value(mark);
            replay.diagnostics.active_positions += 1;
        }
    }

    if cohort == Cohort::ClobClosed && replay.diagnostics.active_positions > 0 {
        cohort = Cohort::ClobActive;
    }
    if let Some(forced) = options.cohort_override {
        cohort = forced;
    }
    replay.diagnostics.cohort = cohort;
    replay.diagnostics.clob_count = assembled.clob_count;
    replay.diagnostics.non_clob_count = assembled.non_clob_count;
    replay.diagnostics.omega_inputs_missing = {
        let mut v: Vec<String> = missing_marks.into_iter().collect();
        v.sort();
        v
    };

    let realized: Amount = replay.positions.values().map(|p| p.realized_pnl).sum();

    Ok(WalletPnlReport {
        wallet,
        realized: from_amount(realized),
        unrealized: from_amount(unrealized),
        total: from_amount(realized + unrealized),
        position_value: from_amount(position_value),
        diagnostics: replay.diagnostics,
    })
}

/// Compute reports for many wallets with bounded concurrency. A failure for
/// one wallet is captured in its slot; the batch always completes.
pub async fn compute_batch(
    store: EventStore,
    wallets: Vec<String>,
    options: PnlOptions,
) -> Vec<(String, Result<WalletPnlReport>)> {
    let mut results = Vec::with_capacity(wallets.len());
    let mut in_flight = FuturesUnordered::new();
    let mut queue = wallets.into_iter();

    loop {
        while in_flight.len() < BATCH_CONCURRENCY {
            let Some(wallet) = queue.next() else { break };
            let store = store.clone();
            let options = options.clone();
            in_flight.push(tokio::task::spawn_blocking(move || {
                let report = compute_wallet_pnl(&store, &wallet, &options);
                (wallet, report)
            }));
        }
        match in_flight.next().await {
            Some(Ok((wallet, report))) => {
                if let Err(e) = &report {
                    warn!("pnl computation failed for {}: {:#}", wallet, e);
                }
                results.push((wallet, report));
            }
            Some(Err(join_err)) => {
                warn!("pnl worker panicked: {}", join_err);
            }
            None => break,
        }
    }

    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}
