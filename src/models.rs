use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Fill role on the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeRole {
    Maker,
    Taker,
}

impl TradeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeRole::Maker => "maker",
            TradeRole::Taker => "taker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "maker" => Some(TradeRole::Maker),
            "taker" => Some(TradeRole::Taker),
            _ => None,
        }
    }
}

/// Origin of a trade event. Closed set; anything else is rejected on ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Clob,
    PositionSplit,
    PositionsMerge,
    PayoutRedemption,
    Erc1155Transfer,
    Deposit,
    Withdrawal,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Clob => "clob",
            SourceType::PositionSplit => "position_split",
            SourceType::PositionsMerge => "positions_merge",
            SourceType::PayoutRedemption => "payout_redemption",
            SourceType::Erc1155Transfer => "erc1155_transfer",
            SourceType::Deposit => "deposit",
            SourceType::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "clob" => Some(SourceType::Clob),
            "position_split" => Some(SourceType::PositionSplit),
            "positions_merge" => Some(SourceType::PositionsMerge),
            "payout_redemption" => Some(SourceType::PayoutRedemption),
            "erc1155_transfer" => Some(SourceType::Erc1155Transfer),
            "deposit" => Some(SourceType::Deposit),
            "withdrawal" => Some(SourceType::Withdrawal),
            _ => None,
        }
    }

    /// Funding events move cash only and never enter the PnL replay.
    pub fn is_funding(&self) -> bool {
        matches!(self, SourceType::Deposit | SourceType::Withdrawal)
    }
}

/// The atomic input of both engines. Immutable once created upstream.
///
/// `event_id` is globally unique and is the deduplication key everywhere.
/// `outcome_index` is `None` only for condition-level events (splits, merges,
/// redemptions reported without a leg).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub event_id: String,
    pub wallet_address: String,
    pub tx_hash: String,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
    pub condition_id: String,
    pub outcome_index: Option<u32>,
    pub token_id: Option<String>,
    pub side: Side,
    pub role: TradeRole,
    /// Token quantity (outcome shares).
    pub tokens: f64,
    /// USDC notional of the event.
    pub usdc: f64,
    pub source_type: SourceType,
}

impl TradeEvent {
    /// USDC price per token, when the event carries both legs.
    pub fn price(&self) -> Option<f64> {
        if self.tokens > 0.0 {
            Some(self.usdc / self.tokens)
        } else {
            None
        }
    }
}

/// Resolution of a condition: normalised payout per outcome index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketResolution {
    pub condition_id: String,
    pub payouts: Vec<f64>,
    pub resolved_at: DateTime<Utc>,
}

impl MarketResolution {
    pub fn payout_for(&self, outcome_index: u32) -> Option<f64> {
        self.payouts.get(outcome_index as usize).copied()
    }
}

/// Terminal state of one consensus evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Executed,
    Simulated,
    Skipped,
    Filtered,
    Error,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Executed => "executed",
            DecisionStatus::Simulated => "simulated",
            DecisionStatus::Skipped => "skipped",
            DecisionStatus::Filtered => "filtered",
            DecisionStatus::Error => "error",
        }
    }

    /// A decision that actually opened (or would open) a position.
    pub fn is_fill(&self) -> bool {
        matches!(self, DecisionStatus::Executed | DecisionStatus::Simulated)
    }
}

/// Immutable record of one consensus evaluation by the copy-trade engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source_wallet: String,
    pub matched_wallets: Vec<String>,
    pub condition_id: String,
    pub market_id: String,
    pub side: Side,
    pub outcome: String,
    pub price: f64,
    pub size_usd: f64,
    pub status: DecisionStatus,
    pub reason: Option<String>,
    pub dry_run: bool,
}

/// Lifecycle of a simulated position: open -> closed | resolved, no reopening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
    Resolved,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
            PositionStatus::Resolved => "resolved",
        }
    }
}

/// Exit rule attached to a paper position. Evaluated in attachment order;
/// the first rule that fires wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExitRule {
    PriceTarget { price: f64 },
    StopLoss { price: f64 },
    TrailingStop { pct: f64 },
    WalletExit { wallets: Vec<String> },
}

impl ExitRule {
    pub fn kind(&self) -> &'static str {
        match self {
            ExitRule::PriceTarget { .. } => "price_target",
            ExitRule::StopLoss { .. } => "stop_loss",
            ExitRule::TrailingStop { .. } => "trailing_stop",
            ExitRule::WalletExit { .. } => "wallet_exit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRuleAttachment {
    pub rule: ExitRule,
    pub attached_at: DateTime<Utc>,
}

/// A simulated position derived from a fill decision.
///
/// Back-references (decision, source event) are ids only; resolve through the
/// respective stores. The position owns its exit rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPosition {
    pub id: String,
    pub decision_id: String,
    pub source_event_id: String,
    pub condition_id: String,
    pub market_id: String,
    pub side: Side,
    pub outcome: String,
    pub entry_price: f64,
    pub size_usd: f64,
    pub tokens: f64,
    pub current_price: f64,
    /// Highest mark observed since entry; drives trailing stops.
    pub high_watermark: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: Option<f64>,
    pub exit_price: Option<f64>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
    pub exit_rules: Vec<ExitRuleAttachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Low => "low",
            AlertPriority::Medium => "medium",
            AlertPriority::High => "high",
            AlertPriority::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ConsensusTriggered,
    PositionOpened,
    ExitTriggered,
    MonitorError,
}

/// Typed notification emitted by the copy-trade core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub priority: AlertPriority,
    pub title: String,
    pub message: String,
    pub condition_id: Option<String>,
    pub position_id: Option<String>,
    pub decision_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub dismissed: bool,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Source wallets the copy-trade engine watches.
    pub copy_wallets: Vec<String>,
    pub consensus_mode: String,
    pub n_required: usize,
    pub min_source_notional_usd: f64,
    pub max_copy_per_trade_usd: f64,
    pub dry_run: bool,
    pub enable_logging: bool,
    pub price_poll_interval_ms: u64,
    pub ingress_poll_interval_ms: u64,
    pub market_data_url: String,
    pub cron_secret: Option<String>,
    pub condition_allowlist: Option<Vec<String>>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./pulsebot.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let copy_wallets = std::env::var("COPY_WALLETS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let consensus_mode =
            std::env::var("CONSENSUS_MODE").unwrap_or_else(|_| "two_agree".to_string());

        let n_required = std::env::var("N_REQUIRED")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .unwrap_or(2);

        let min_source_notional_usd = std::env::var("MIN_SOURCE_NOTIONAL_USD")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .unwrap_or(100.0);

        let max_copy_per_trade_usd = std::env::var("MAX_COPY_PER_TRADE_USD")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50.0);

        let dry_run = std::env::var("DRY_RUN")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        let enable_logging = std::env::var("ENABLE_LOGGING")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        let price_poll_interval_ms = std::env::var("PRICE_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "10000".to_string())
            .parse()
            .unwrap_or(10_000);

        let ingress_poll_interval_ms = std::env::var("INGRESS_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .unwrap_or(2_000);

        let market_data_url = std::env::var("MARKET_DATA_URL")
            .unwrap_or_else(|_| "https://clob.polymarket.com".to_string());

        let cron_secret = std::env::var("CRON_SECRET").ok().filter(|s| !s.is_empty());

        let condition_allowlist = std::env::var("CONDITION_ALLOWLIST").ok().map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Ok(Self {
            database_path,
            port,
            copy_wallets,
            consensus_mode,
            n_required,
            min_source_notional_usd,
            max_copy_per_trade_usd,
            dry_run,
            enable_logging,
            price_poll_interval_ms,
            ingress_poll_interval_ms,
            market_data_url,
            cron_secret,
            condition_allowlist,
        })
    }
}
