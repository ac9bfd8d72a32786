//! Per-wallet PnL reconstruction.
//!
//! Loads every relevant event for a wallet from the event store, normalises
//! them into one ordered list (`assembly`), replays them through the ledger
//! primitives, and emits a structured report (`engine`).

pub mod assembly;
pub mod engine;

pub use engine::{
    compute_batch, compute_wallet_pnl, Cohort, PnlDiagnostics, PnlOptions, WalletPnlReport,
};
