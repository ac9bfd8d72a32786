//! Market-data fetch client.
//!
//! Single endpoint: current prices for a condition. Bounded at 5 seconds per
//! request with one retry; every failure is opaque to callers (`None`), who
//! treat it as "no data this tick".

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const FETCH_RETRIES: u32 = 1;

/// Price snapshot for one condition.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketPrices {
    #[serde(default)]
    pub yes_price: Option<f64>,
    #[serde(default)]
    pub no_price: Option<f64>,
    #[serde(default)]
    pub best_bid: Option<f64>,
}

/// Anything that can produce a mark for a `(condition, outcome)` pair.
/// The price monitor depends on this seam so ticks can be driven with
/// scripted prices in tests.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn price(&self, condition_id: &str, outcome: &str) -> Option<f64>;
}

pub struct MarketDataClient {
    client: Client,
    base_url: String,
}

impl MarketDataClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("build market data client: {}", e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch prices for a condition. One retry; `None` on repeated failure.
    pub async fn fetch_prices(&self, condition_id: &str) -> Option<MarketPrices> {
        let url = format!("{}/price", self.base_url);
        for attempt in 0..=FETCH_RETRIES {
            let result = self
                .client
                .get(&url)
                .query(&[("condition_id", condition_id)])
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    match response.json::<MarketPrices>().await {
                        Ok(prices) => return Some(prices),
                        Err(e) => {
                            warn!("bad price payload for {}: {}", condition_id, e);
                            return None;
                        }
                    }
                }
                Ok(response) => {
                    debug!(
                        "price fetch for {} returned {} (attempt {})",
                        condition_id,
                        response.status(),
                        attempt + 1
                    );
                }
                Err(e) => {
                    debug!(
                        "price fetch for {} failed (attempt {}): {}",
                        condition_id,
                        attempt + 1,
                        e
                    );
                }
            }
        }
        None
    }
}

#[async_trait]
impl PriceSource for MarketDataClient {
    async fn price(&self, condition_id: &str, outcome: &str) -> Option<f64> {
        let prices = self.fetch_prices(condition_id).await?;
        match outcome.to_ascii_lowercase().as_str() {
            "no" | "down" | "1" => prices.no_price,
            _ => prices.yes_price.or(prices.best_bid),
        }
    }
}
