//! Feed boundary.
//!
//! The exchange is an external collaborator that hands over batches of
//! normalized ticks; everything protocol-specific stays behind the
//! `MarketFeed` trait. The HTTP implementation polls a 24h ticker
//! endpoint, tolerates ticks without open interest, and applies the
//! quote-volume floor before anything enters the pipeline.

use async_trait::async_trait;
use tracing::debug;

use market::types::FeedTick;

#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn fetch_batch(&self) -> anyhow::Result<Vec<FeedTick>>;
}

pub struct HttpMarketFeed {
    http: reqwest::Client,
    endpoint: String,
    min_quote_volume: f64,
}

impl HttpMarketFeed {
    pub fn new(endpoint: impl Into<String>, min_quote_volume: f64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            min_quote_volume,
        })
    }
}

#[async_trait]
impl MarketFeed for HttpMarketFeed {
    async fn fetch_batch(&self) -> anyhow::Result<Vec<FeedTick>> {
        let response = self.http.get(&self.endpoint).send().await?;
        let ticks: Vec<FeedTick> = response.error_for_status()?.json().await?;

        let total = ticks.len();
        let mut kept: Vec<FeedTick> = ticks
            .into_iter()
            .filter(|t| t.volume_24h >= self.min_quote_volume)
            .collect();

        // Busiest symbols first, matching the upstream dashboard ordering.
        kept.sort_by(|a, b| {
            b.volume_24h
                .partial_cmp(&a.volume_24h)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            total,
            kept = kept.len(),
            floor = self.min_quote_volume,
            "feed batch fetched"
        );

        Ok(kept)
    }
}
