//! In-memory stores for the copy-trade core.
//!
//! The log and alert stores are bounded ring buffers that evict strictly
//! oldest-first; the position store is keyed and unbounded for the lifetime
//! of a run. All mutations are serialized behind a per-store mutex and no
//! lock is ever held across an await point.

pub mod alert_store;
pub mod log_store;
pub mod position_store;

pub use alert_store::AlertStore;
pub use log_store::LogStore;
pub use position_store::PositionStore;
