use crate::models::{ExitRule, ExitRuleAttachment, PaperPosition, PositionStatus};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Keyed store of paper positions. Positions are few per run, so this stays
/// unbounded; the monitor and the engine share it with disjoint write sets.
pub struct PositionStore {
    positions: Mutex<HashMap<String, PaperPosition>>,
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionStore {
    pub fn new() -> Self {
        Self {
            positions: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, position: PaperPosition) {
        self.positions.lock().insert(position.id.clone(), position);
    }

    pub fn get(&self, id: &str) -> Option<PaperPosition> {
        self.positions.lock().get(id).cloned()
    }

    /// Open positions, oldest first, as a consistent snapshot for one
    /// monitor tick.
    pub fn open_positions(&self) -> Vec<PaperPosition> {
        let positions = self.positions.lock();
        let mut open: Vec<PaperPosition> = positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect();
        open.sort_by(|a, b| (a.opened_at, &a.id).cmp(&(b.opened_at, &b.id)));
        open
    }

    pub fn by_status(&self, status: Option<PositionStatus>) -> Vec<PaperPosition> {
        let positions = self.positions.lock();
        let mut out: Vec<PaperPosition> = positions
            .values()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.opened_at, &a.id).cmp(&(b.opened_at, &b.id)));
        out
    }

    /// Attach an exit rule to an open position. Rules are evaluated in
    /// attachment order.
    pub fn attach_exit_rule(&self, id: &str, rule: ExitRule) -> bool {
        let mut positions = self.positions.lock();
        match positions.get_mut(id) {
            Some(p) if p.status == PositionStatus::Open => {
                p.exit_rules.push(ExitRuleAttachment {
                    rule,
                    attached_at: Utc::now(),
                });
                true
            }
            _ => false,
        }
    }

    /// Update the monitor-owned mark fields of an open position.
    pub fn update_mark(&self, id: &str, current_price: f64, unrealized_pnl: f64) -> bool {
        let mut positions = self.positions.lock();
        match positions.get_mut(id) {
            Some(p) if p.status == PositionStatus::Open => {
                p.current_price = current_price;
                if current_price > p.high_watermark {
                    p.high_watermark = current_price;
                }
                p.unrealized_pnl = unrealized_pnl;
                true
            }
            _ => false,
        }
    }

    /// Close a position. Terminal states never reopen; closing an already
    /// terminal position is a no-op returning None.
    pub fn close(
        &self,
        id: &str,
        exit_price: f64,
        realized_pnl: f64,
        reason: &str,
        status: PositionStatus,
    ) -> Option<PaperPosition> {
        debug_assert!(status != PositionStatus::Open);
        let mut positions = self.positions.lock();
        let p = positions.get_mut(id)?;
        if p.status != PositionStatus::Open {
            return None;
        }
        p.status = status;
        p.exit_price = Some(exit_price);
        p.realized_pnl = Some(realized_pnl);
        p.closed_at = Some(Utc::now());
        p.exit_reason = Some(reason.to_string());
        p.unrealized_pnl = 0.0;
        Some(p.clone())
    }

    pub fn len(&self) -> usize {
        self.positions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn position(id: &str) -> PaperPosition {
        PaperPosition {
            id: id.to_string(),
            decision_id: "d".to_string(),
            source_event_id: "e".to_string(),
            condition_id: "0xc".to_string(),
            market_id: "m".to_string(),
            side: Side::Buy,
            outcome: "yes".to_string(),
            entry_price: 0.40,
            size_usd: 20.0,
            tokens: 50.0,
            current_price: 0.40,
            high_watermark: 0.40,
            unrealized_pnl: 0.0,
            realized_pnl: None,
            exit_price: None,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            exit_reason: None,
            exit_rules: Vec::new(),
        }
    }

    #[test]
    fn close_is_terminal() {
        let store = PositionStore::new();
        store.insert(position("p1"));

        let closed = store.close("p1", 0.48, 4.0, "price_target", PositionStatus::Closed);
        assert!(closed.is_some());
        assert_eq!(closed.unwrap().exit_price, Some(0.48));

        // A second close attempt does nothing.
        assert!(store
            .close("p1", 0.10, -15.0, "stop_loss", PositionStatus::Closed)
            .is_none());
        let p = store.get("p1").unwrap();
        assert_eq!(p.exit_reason.as_deref(), Some("price_target"));
    }

    #[test]
    fn open_snapshot_excludes_terminal_positions() {
        let store = PositionStore::new();
        store.insert(position("p1"));
        store.insert(position("p2"));
        store.close("p1", 0.5, 5.0, "manual", PositionStatus::Closed);

        let open = store.open_positions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "p2");
    }

    #[test]
    fn update_mark_raises_watermark_monotonically() {
        let store = PositionStore::new();
        store.insert(position("p1"));

        store.update_mark("p1", 0.55, 7.5);
        assert_eq!(store.get("p1").unwrap().high_watermark, 0.55);

        store.update_mark("p1", 0.45, 2.5);
        let p = store.get("p1").unwrap();
        assert_eq!(p.current_price, 0.45);
        assert_eq!(p.high_watermark, 0.55);
    }

    #[test]
    fn exit_rules_attach_in_order() {
        let store = PositionStore::new();
        store.insert(position("p1"));
        assert!(store.attach_exit_rule("p1", ExitRule::PriceTarget { price: 0.48 }));
        assert!(store.attach_exit_rule("p1", ExitRule::StopLoss { price: 0.36 }));

        let p = store.get("p1").unwrap();
        assert_eq!(p.exit_rules.len(), 2);
        assert_eq!(p.exit_rules[0].rule.kind(), "price_target");
        assert_eq!(p.exit_rules[1].rule.kind(), "stop_loss");

        store.close("p1", 0.4, 0.0, "manual", PositionStatus::Closed);
        assert!(!store.attach_exit_rule("p1", ExitRule::TrailingStop { pct: 0.1 }));
    }
}
