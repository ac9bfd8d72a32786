//! Trade-stream ingress.
//!
//! Tails the event store by `(block_number, event_id)` cursor and feeds new
//! events to the copy-trade engine in order. The engine assumes a monotonic
//! per-wallet stream; the cursor order gives it a monotonic global one.

use crate::copytrade::CopyTradeEngine;
use crate::olap::EventStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

const BATCH_SIZE: usize = 500;

/// Cursor into the event stream.
#[derive(Debug, Clone, Default)]
pub struct IngressCursor {
    pub block_number: i64,
    pub event_id: String,
}

/// Drain everything past the cursor through the engine once. Returns the
/// number of events fed.
pub async fn poll_once(
    store: &EventStore,
    engine: &CopyTradeEngine,
    cursor: &mut IngressCursor,
) -> Result<usize> {
    let mut fed = 0;
    loop {
        let events = store.events_after(cursor.block_number, &cursor.event_id, BATCH_SIZE)?;
        if events.is_empty() {
            return Ok(fed);
        }
        for event in events {
            cursor.block_number = event.block_number;
            cursor.event_id = event.event_id.clone();
            match engine.process_trade_event(&event).await {
                Ok(Some(decision)) => {
                    debug!(
                        "ingress decision {}: {} ({})",
                        decision.id,
                        decision.status.as_str(),
                        decision.reason.as_deref().unwrap_or("-")
                    );
                }
                Ok(None) => {}
                Err(e) => warn!("event {} failed processing: {:#}", event.event_id, e),
            }
            fed += 1;
        }
    }
}

/// Long-running ingress loop; stops when the shutdown signal fires.
pub async fn run(
    store: EventStore,
    engine: Arc<CopyTradeEngine>,
    poll_interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut cursor = IngressCursor::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(poll_interval_ms.max(100)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = poll_once(&store, &engine, &mut cursor).await {
                    warn!("ingress poll failed: {:#}", e);
                }
            }
        }
    }
    debug!("ingress loop stopped");
}
