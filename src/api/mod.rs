//! Thin HTTP surface over the core engines and stores.

pub mod routes;

use crate::copytrade::PriceMonitor;
use crate::olap::EventStore;
use crate::stores::{AlertStore, LogStore, PositionStore};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers. The copy-trade engine itself is
/// not here: it is driven by the ingress loop, not by requests.
#[derive(Clone)]
pub struct AppState {
    pub store: EventStore,
    pub log: Arc<LogStore>,
    pub alerts: Arc<AlertStore>,
    pub positions: Arc<PositionStore>,
    pub monitor: Arc<PriceMonitor>,
    pub cron_secret: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/pnl/:wallet", get(routes::get_wallet_pnl))
        .route("/api/pnl/batch", post(routes::post_batch_pnl))
        .route("/api/decisions", get(routes::get_decisions))
        .route("/api/alerts", get(routes::get_alerts))
        .route("/api/alerts/read-all", post(routes::mark_all_alerts_read))
        .route("/api/alerts/:id/read", post(routes::mark_alert_read))
        .route("/api/alerts/:id/dismiss", post(routes::dismiss_alert))
        .route("/api/positions", get(routes::get_positions))
        .route("/api/monitor/status", get(routes::get_monitor_status))
        .route("/api/leaderboard", get(routes::get_leaderboard))
        .route("/api/leaderboard/refresh", post(routes::refresh_leaderboard))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
