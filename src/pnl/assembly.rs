//! Event assembly: load, deduplicate, attribute, normalise, order.
//!
//! The replay consumes one flat event list per wallet. Getting that list
//! right is most of the battle: proxy-emitted condition events are pulled in
//! by shared transaction hash, synthetic splits (matched opposite-outcome
//! pairs) are collapsed, and intra-transaction ordering puts inventory
//! sources ahead of the sells that consume them.

use crate::models::{Side, SourceType, TradeEvent};
use crate::olap::EventStore;
use anyhow::Result;
use std::collections::{HashMap, HashSet};

/// Canonical acquisition price for split-minted tokens on binary markets.
pub const SPLIT_COST_PRICE: f64 = 0.50;

/// Matched-pair size tolerance (fraction of the larger leg).
pub const PAIR_SIZE_TOLERANCE: f64 = 0.01;

/// Matched-pair price-sum tolerance around 1.00.
pub const PAIR_PRICE_SUM_TOLERANCE: f64 = 0.05;

/// Intra-transaction ordering: inventory sources first, so split-induced
/// deficits are visible before the sells that consume them.
fn intra_tx_order(event: &TradeEvent) -> u8 {
    match event.source_type {
        SourceType::PositionSplit | SourceType::Erc1155Transfer => 0,
        SourceType::Clob => match event.side {
            Side::Sell => 1,
            Side::Buy => 2,
        },
        SourceType::PositionsMerge => 3,
        SourceType::PayoutRedemption => 4,
        SourceType::Deposit | SourceType::Withdrawal => 5,
    }
}

#[derive(Debug, Default)]
pub struct AssembledEvents {
    /// Sorted, normalised replay input.
    pub events: Vec<TradeEvent>,
    pub clob_count: usize,
    pub non_clob_count: usize,
    pub synthetic_pairs_removed: usize,
    pub funding_skipped: usize,
    pub unmapped_skipped: usize,
    pub warnings: Vec<String>,
}

/// Load and normalise every PnL-bearing event for one wallet.
pub fn assemble_wallet_events(store: &EventStore, wallet: &str) -> Result<AssembledEvents> {
    let wallet = wallet.to_lowercase();
    let mut out = AssembledEvents::default();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut events: Vec<TradeEvent> = Vec::new();

    // 1. Order-book fills, deduplicated by event id.
    let fills = store.fills_for_wallet(&wallet)?;
    let mut tx_hashes: HashSet<String> = HashSet::new();
    for fill in fills {
        if !seen_ids.insert(fill.event_id.clone()) {
            continue;
        }
        tx_hashes.insert(fill.tx_hash.clone());
        events.push(fill);
    }

    // 2. Condition-level events: direct attribution plus proxy attribution
    //    through the fills' transaction hashes.
    for event in store.condition_events_for_wallet(&wallet, &tx_hashes)? {
        if seen_ids.insert(event.event_id.clone()) {
            events.push(event);
        }
    }

    // 3. ERC-1155 transfers in: token acquisitions at the split price.
    for event in store.transfers_for_wallet(&wallet)? {
        if seen_ids.insert(event.event_id.clone()) {
            events.push(event);
        }
    }

    // 4. Drop funding events and records the replay cannot place.
    events.retain(|e| {
        if e.source_type.is_funding() {
            out.funding_skipped += 1;
            return false;
        }
        if e.condition_id.is_empty() {
            out.unmapped_skipped += 1;
            out.warnings
                .push(format!("event {} has no condition mapping", e.event_id));
            return false;
        }
        if e.tokens <= 0.0 && e.source_type != SourceType::PayoutRedemption {
            out.unmapped_skipped += 1;
            return false;
        }
        true
    });

    // 5. Collapse synthetic splits.
    let removed = remove_synthetic_pairs(&mut events);
    out.synthetic_pairs_removed = removed;

    // 6. Deterministic replay order.
    events.sort_by(|a, b| {
        (a.block_number, &a.tx_hash, intra_tx_order(a), &a.event_id).cmp(&(
            b.block_number,
            &b.tx_hash,
            intra_tx_order(b),
            &b.event_id,
        ))
    });

    out.clob_count = events
        .iter()
        .filter(|e| e.source_type == SourceType::Clob)
        .count();
    out.non_clob_count = events.len() - out.clob_count;
    out.events = events;
    Ok(out)
}

/// A matched pair of opposite-outcome trades in one transaction with equal
/// sizes (within `PAIR_SIZE_TOLERANCE`) and prices summing to ~1.00 (within
/// `PAIR_PRICE_SUM_TOLERANCE`) is a synthetic split: both legs describe one
/// underlying mint. If the transaction also carries a real PositionSplit the
/// buy leg is dropped (the split provides the tokens); otherwise the sell
/// leg is dropped (there is no inventory source for it).
fn remove_synthetic_pairs(events: &mut Vec<TradeEvent>) -> usize {
    // Transactions that carry a real split, per condition.
    let mut split_txs: HashSet<(String, String)> = HashSet::new();
    for e in events.iter() {
        if e.source_type == SourceType::PositionSplit {
            split_txs.insert((e.tx_hash.clone(), e.condition_id.clone()));
        }
    }

    // Group CLOB fills by (tx, condition).
    let mut groups: HashMap<(String, String), Vec<usize>> = HashMap::new();
    for (idx, e) in events.iter().enumerate() {
        if e.source_type == SourceType::Clob {
            groups
                .entry((e.tx_hash.clone(), e.condition_id.clone()))
                .or_default()
                .push(idx);
        }
    }

    let mut drop_indices: HashSet<usize> = HashSet::new();
    for ((tx_hash, condition_id), indices) in &groups {
        if indices.len() < 2 {
            continue;
        }
        let has_split = split_txs.contains(&(tx_hash.clone(), condition_id.clone()));
        let mut used: HashSet<usize> = HashSet::new();

        for &i in indices {
            if used.contains(&i) || events[i].side != Side::Buy {
                continue;
            }
            for &j in indices {
                if i == j || used.contains(&j) || events[j].side != Side::Sell {
                    continue;
                }
                if events[i].outcome_index == events[j].outcome_index {
                    continue;
                }
                let (buy, sell) = (&events[i], &events[j]);
                let larger = buy.tokens.max(sell.tokens);
                if larger <= 0.0 || (buy.tokens - sell.tokens).abs() > larger * PAIR_SIZE_TOLERANCE
                {
                    continue;
                }
                let (Some(buy_price), Some(sell_price)) = (buy.price(), sell.price()) else {
                    continue;
                };
                if ((buy_price + sell_price) - 1.0).abs() > PAIR_PRICE_SUM_TOLERANCE {
                    continue;
                }

                used.insert(i);
                used.insert(j);
                drop_indices.insert(if has_split { i } else { j });
                break;
            }
        }
    }

    let removed = drop_indices.len();
    if removed > 0 {
        let mut idx = 0;
        events.retain(|_| {
            let keep = !drop_indices.contains(&idx);
            idx += 1;
            keep
        });
    }
    removed
}
