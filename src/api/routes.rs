//! Route handlers. Every surface returns either a success record or a
//! `{success: false, error}` body; engine internals never leak as panics.

use crate::api::AppState;
use crate::leaderboard::{self, RefreshReport, REFRESH_TIMEOUT_SECS};
use crate::models::{Alert, Decision, DecisionStatus, PaperPosition, PositionStatus};
use crate::pnl::{compute_batch, compute_wallet_pnl, PnlOptions, WalletPnlReport};
use crate::stores::log_store::LogFilter;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: message.into(),
        }),
    )
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PnlQuery {
    /// Mark overrides: `cid:price,cid:price`.
    pub mark: Option<String>,
}

pub async fn get_wallet_pnl(
    Path(wallet): Path<String>,
    Query(params): Query<PnlQuery>,
    State(state): State<AppState>,
) -> Result<Json<WalletPnlReport>, ApiError> {
    let mut options = PnlOptions::default();
    if let Some(marks) = &params.mark {
        options.price_overrides = parse_mark_overrides(marks)
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
    }

    let store = state.store.clone();
    let report = tokio::task::spawn_blocking(move || compute_wallet_pnl(&store, &wallet, &options))
        .await
        .map_err(|e| {
            error!("pnl worker panicked: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "pnl worker failed")
        })?
        .map_err(|e| {
            error!("pnl computation failed: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct BatchPnlRequest {
    pub wallets: Vec<String>,
    #[serde(default)]
    pub price_overrides: HashMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub struct BatchPnlEntry {
    pub wallet: String,
    pub report: Option<WalletPnlReport>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchPnlResponse {
    pub results: Vec<BatchPnlEntry>,
    pub failed: usize,
}

/// Batch PnL: a failing wallet is reported in its slot, never failing the
/// batch.
pub async fn post_batch_pnl(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<BatchPnlRequest>,
) -> Result<Json<BatchPnlResponse>, ApiError> {
    if request.wallets.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "no wallets given"));
    }
    if request.wallets.len() > 200 {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "at most 200 wallets per batch",
        ));
    }

    let options = PnlOptions {
        price_overrides: request
            .price_overrides
            .into_iter()
            .map(|(condition, price)| (condition.to_lowercase(), price))
            .collect(),
        cohort_override: None,
    };
    let results = compute_batch(state.store.clone(), request.wallets, options).await;
    let results: Vec<BatchPnlEntry> = results
        .into_iter()
        .map(|(wallet, outcome)| match outcome {
            Ok(report) => BatchPnlEntry {
                wallet,
                report: Some(report),
                error: None,
            },
            Err(e) => BatchPnlEntry {
                wallet,
                report: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    Ok(Json(BatchPnlResponse { results, failed }))
}

fn parse_mark_overrides(raw: &str) -> Result<HashMap<String, f64>, String> {
    let mut overrides = HashMap::new();
    for pair in raw.split(',').filter(|p| !p.is_empty()) {
        let (condition, price) = pair
            .split_once(':')
            .ok_or_else(|| format!("bad mark override '{}'", pair))?;
        let price: f64 = price
            .parse()
            .map_err(|_| format!("bad mark price '{}'", price))?;
        if !(0.0..=1.0).contains(&price) {
            return Err(format!("mark price {} outside [0, 1]", price));
        }
        overrides.insert(condition.to_lowercase(), price);
    }
    Ok(overrides)
}

#[derive(Debug, Deserialize)]
pub struct DecisionQuery {
    pub status: Option<String>,
    pub wallet: Option<String>,
    pub condition_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub decisions: Vec<Decision>,
    pub count: usize,
}

pub async fn get_decisions(
    Query(params): Query<DecisionQuery>,
    State(state): State<AppState>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let status = match &params.status {
        Some(raw) => Some(parse_status(raw).map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?),
        None => None,
    };
    let filter = LogFilter {
        status,
        source_wallet: params.wallet,
        condition_id: params.condition_id,
    };
    let decisions = state.log.query(&filter, params.limit.unwrap_or(100));
    Ok(Json(DecisionResponse {
        count: decisions.len(),
        decisions,
    }))
}

fn parse_status(raw: &str) -> Result<DecisionStatus, String> {
    match raw.to_ascii_lowercase().as_str() {
        "executed" => Ok(DecisionStatus::Executed),
        "simulated" => Ok(DecisionStatus::Simulated),
        "skipped" => Ok(DecisionStatus::Skipped),
        "filtered" => Ok(DecisionStatus::Filtered),
        "error" => Ok(DecisionStatus::Error),
        other => Err(format!("unknown status '{}'", other)),
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub alerts: Vec<Alert>,
    pub unread: usize,
    pub counts_by_priority: HashMap<String, usize>,
}

pub async fn get_alerts(
    Query(params): Query<AlertQuery>,
    State(state): State<AppState>,
) -> Json<AlertResponse> {
    let alerts = state.alerts.recent(params.limit.unwrap_or(100));
    let counts_by_priority = state
        .alerts
        .counts_by_priority()
        .into_iter()
        .map(|(priority, count)| (priority.as_str().to_string(), count))
        .collect();
    Json(AlertResponse {
        unread: state.alerts.unread_count(),
        counts_by_priority,
        alerts,
    })
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
    pub updated: usize,
}

pub async fn mark_alert_read(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AckResponse>, ApiError> {
    if state.alerts.mark_read(&id) {
        Ok(Json(AckResponse {
            success: true,
            updated: 1,
        }))
    } else {
        Err(error_response(StatusCode::NOT_FOUND, "alert not found"))
    }
}

pub async fn mark_all_alerts_read(State(state): State<AppState>) -> Json<AckResponse> {
    let updated = state.alerts.mark_all_read();
    Json(AckResponse {
        success: true,
        updated,
    })
}

pub async fn dismiss_alert(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AckResponse>, ApiError> {
    if state.alerts.dismiss(&id) {
        Ok(Json(AckResponse {
            success: true,
            updated: 1,
        }))
    } else {
        Err(error_response(StatusCode::NOT_FOUND, "alert not found"))
    }
}

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    pub positions: Vec<PaperPosition>,
    pub count: usize,
}

pub async fn get_positions(
    Query(params): Query<PositionQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionResponse>, ApiError> {
    let status = match params.status.as_deref() {
        None => None,
        Some("open") => Some(PositionStatus::Open),
        Some("closed") => Some(PositionStatus::Closed),
        Some("resolved") => Some(PositionStatus::Resolved),
        Some(other) => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown position status '{}'", other),
            ))
        }
    };
    let positions = state.positions.by_status(status);
    Ok(Json(PositionResponse {
        count: positions.len(),
        positions,
    }))
}

pub async fn get_monitor_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "monitor": state.monitor.status() }))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

pub async fn get_leaderboard(
    Query(params): Query<LeaderboardQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let store = state.store.clone();
    let limit = params.limit.unwrap_or(100);
    let rows = tokio::task::spawn_blocking(move || leaderboard::read_leaderboard(&store, limit))
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({
        "count": rows.len(),
        "leaderboard": rows,
    })))
}

/// Idempotent leaderboard rebuild, bounded at 600 seconds. When a cron
/// secret is configured the caller must present it as a bearer token.
pub async fn refresh_leaderboard(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<RefreshReport>, ApiError> {
    if let Some(secret) = &state.cron_secret {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| token == secret)
            .unwrap_or(false);
        if !authorized {
            return Err(error_response(StatusCode::UNAUTHORIZED, "bad bearer token"));
        }
    }

    let store = state.store.clone();
    let work =
        tokio::task::spawn_blocking(move || leaderboard::refresh_leaderboard(&store, Utc::now()));
    let report = tokio::time::timeout(Duration::from_secs(REFRESH_TIMEOUT_SECS), work)
        .await
        .map_err(|_| error_response(StatusCode::GATEWAY_TIMEOUT, "refresh timed out"))?
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| {
            error!("leaderboard refresh failed: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_overrides_parse_and_validate() {
        let overrides = parse_mark_overrides("0xAA:0.6,0xbb:0.25").unwrap();
        assert_eq!(overrides.get("0xaa"), Some(&0.6));
        assert_eq!(overrides.get("0xbb"), Some(&0.25));

        assert!(parse_mark_overrides("junk").is_err());
        assert!(parse_mark_overrides("0xaa:1.5").is_err());
    }

    #[test]
    fn status_parsing_covers_the_closed_set() {
        assert_eq!(parse_status("simulated").unwrap(), DecisionStatus::Simulated);
        assert_eq!(parse_status("FILTERED").unwrap(), DecisionStatus::Filtered);
        assert!(parse_status("bogus").is_err());
    }
}
