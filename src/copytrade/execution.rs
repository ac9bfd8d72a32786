//! Execution sinks for copy-trade decisions.
//!
//! Two variants behind one trait: a deterministic dry-run sink and a live
//! sink that refuses by default. The reference deployment never returns
//! `Executed`; the live path exists so the refuse gate is exercised and
//! observable.

use crate::models::{DecisionStatus, Side};
use async_trait::async_trait;

/// Environment flag that must equal the literal "true" for the live adapter
/// to proceed past its refuse gate.
pub const ENABLE_LIVE_ENV: &str = "ENABLE_LIVE_COPY_TRADE";

pub const REASON_NOTIONAL_EXCEEDS_MAX: &str = "notional_exceeds_max";
pub const REASON_LIVE_DISABLED: &str = "live_execution_disabled";
pub const REASON_LIVE_NOT_CONFIGURED: &str = "live_adapter_not_configured";

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub condition_id: String,
    pub market_id: String,
    pub side: Side,
    pub outcome: String,
    pub price: f64,
    pub size_usd: f64,
    pub max_copy_per_trade_usd: f64,
}

/// Structured result of an execution attempt. Non-throwing by design:
/// refusals are data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Executed { tx_hash: String },
    Simulated,
    Skipped { reason: String },
    Error { message: String },
}

impl ExecutionOutcome {
    pub fn status(&self) -> DecisionStatus {
        match self {
            ExecutionOutcome::Executed { .. } => DecisionStatus::Executed,
            ExecutionOutcome::Simulated => DecisionStatus::Simulated,
            ExecutionOutcome::Skipped { .. } => DecisionStatus::Skipped,
            ExecutionOutcome::Error { .. } => DecisionStatus::Error,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            ExecutionOutcome::Skipped { reason } => Some(reason.clone()),
            ExecutionOutcome::Error { message } => Some(message.clone()),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome;
    fn is_dry_run(&self) -> bool;
}

/// Paper sink: always simulates, except above the per-trade cap.
#[derive(Debug, Default)]
pub struct DryRunAdapter;

#[async_trait]
impl ExecutionAdapter for DryRunAdapter {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        if request.size_usd > request.max_copy_per_trade_usd {
            return ExecutionOutcome::Skipped {
                reason: REASON_NOTIONAL_EXCEEDS_MAX.to_string(),
            };
        }
        ExecutionOutcome::Simulated
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

/// Live sink. Refuses unless `ENABLE_LIVE_COPY_TRADE=true`, and even then
/// reports that no live adapter is wired up.
#[derive(Debug, Default)]
pub struct LiveAdapter;

#[async_trait]
impl ExecutionAdapter for LiveAdapter {
    async fn execute(&self, _request: &ExecutionRequest) -> ExecutionOutcome {
        let enabled = std::env::var(ENABLE_LIVE_ENV)
            .map(|v| v == "true")
            .unwrap_or(false);
        if !enabled {
            return ExecutionOutcome::Skipped {
                reason: REASON_LIVE_DISABLED.to_string(),
            };
        }
        ExecutionOutcome::Skipped {
            reason: REASON_LIVE_NOT_CONFIGURED.to_string(),
        }
    }

    fn is_dry_run(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(size_usd: f64) -> ExecutionRequest {
        ExecutionRequest {
            condition_id: "0xc".to_string(),
            market_id: "m".to_string(),
            side: Side::Buy,
            outcome: "yes".to_string(),
            price: 0.5,
            size_usd,
            max_copy_per_trade_usd: 50.0,
        }
    }

    #[tokio::test]
    async fn dry_run_simulates_under_the_cap() {
        let adapter = DryRunAdapter;
        let outcome = adapter.execute(&request(20.0)).await;
        assert_eq!(outcome, ExecutionOutcome::Simulated);
        assert_eq!(outcome.status(), DecisionStatus::Simulated);
    }

    #[tokio::test]
    async fn dry_run_skips_above_the_cap() {
        let adapter = DryRunAdapter;
        let outcome = adapter.execute(&request(80.0)).await;
        assert_eq!(outcome.status(), DecisionStatus::Skipped);
        assert_eq!(outcome.reason().as_deref(), Some(REASON_NOTIONAL_EXCEEDS_MAX));
    }

    #[tokio::test]
    async fn live_refuses_without_the_env_gate() {
        std::env::remove_var(ENABLE_LIVE_ENV);
        let adapter = LiveAdapter;
        let outcome = adapter.execute(&request(20.0)).await;
        assert_eq!(outcome.reason().as_deref(), Some(REASON_LIVE_DISABLED));
    }
}
