//! Copy-trade core: consensus tracking, execution, paper positions, exits.

pub mod engine;
pub mod execution;
pub mod monitor;

pub use engine::{ConsensusMode, CopyTradeConfig, CopyTradeEngine};
pub use execution::{DryRunAdapter, ExecutionAdapter, ExecutionOutcome, ExecutionRequest, LiveAdapter};
pub use monitor::{MonitorConfig, MonitorStatus, PriceMonitor};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Sells by watched wallets, per `(condition, outcome)`. The engine records,
/// the monitor's wallet-exit rule reads. Timestamps let a rule ignore sells
/// that predate its attachment.
#[derive(Default)]
pub struct WalletExitRegistry {
    sells: Mutex<HashMap<(String, String), Vec<(String, DateTime<Utc>)>>>,
}

impl WalletExitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sell(&self, condition_id: &str, outcome: &str, wallet: &str) {
        let key = (condition_id.to_lowercase(), outcome.to_lowercase());
        self.sells
            .lock()
            .entry(key)
            .or_default()
            .push((wallet.to_lowercase(), Utc::now()));
    }

    /// True when any of `wallets` sold this outcome at or after `since`.
    pub fn sold_since(
        &self,
        condition_id: &str,
        outcome: &str,
        wallets: &[String],
        since: DateTime<Utc>,
    ) -> bool {
        let key = (condition_id.to_lowercase(), outcome.to_lowercase());
        let sells = self.sells.lock();
        let Some(entries) = sells.get(&key) else {
            return false;
        };
        entries.iter().any(|(wallet, at)| {
            *at >= since && wallets.iter().any(|w| w.to_lowercase() == *wallet)
        })
    }
}
