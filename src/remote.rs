//! Backend data source for per-day statistics and product lists.
//!
//! The services only depend on the [`RemoteDataSource`] trait; the
//! backend answers one round trip per requested day with already-decoded
//! records. [`HttpDataSource`] is the production transport.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::models::{DailyStatistics, DaySnapshot};

/// Per-day reads served by the backend.
///
/// "Today" has distinguished endpoints because the backend resolves the
/// user's current day server-side; all other days are addressed by their
/// canonical `dd-MM-yyyy` key.
#[async_trait]
pub trait RemoteDataSource: Send + Sync {
    /// Nutrition summary for a given day, `None` when the backend holds
    /// no record for it.
    async fn stats_for_date(&self, date_key: &str) -> Result<Option<DailyStatistics>>;

    /// Nutrition summary for the current day.
    async fn today_stats(&self) -> Result<Option<DailyStatistics>>;

    /// The current day's product list with totals.
    async fn today_products(&self) -> Result<DaySnapshot>;

    /// A past day's product list with totals.
    async fn products_for_date(&self, date_key: &str) -> Result<DaySnapshot>;
}

/// HTTP/JSON implementation of [`RemoteDataSource`].
#[derive(Clone)]
pub struct HttpDataSource {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpDataSource {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(resp)
    }

    async fn get_stats(&self, path: &str) -> Result<Option<DailyStatistics>> {
        let resp = self.get(path).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("GET {} failed: {} - {}", path, status, body));
        }
        Ok(Some(resp.json().await?))
    }

    async fn get_snapshot(&self, path: &str) -> Result<DaySnapshot> {
        let resp = self.get(path).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            // No products logged for that day.
            return Ok(DaySnapshot::default());
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("GET {} failed: {} - {}", path, status, body));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl RemoteDataSource for HttpDataSource {
    async fn stats_for_date(&self, date_key: &str) -> Result<Option<DailyStatistics>> {
        self.get_stats(&format!("stats/{date_key}")).await
    }

    async fn today_stats(&self) -> Result<Option<DailyStatistics>> {
        self.get_stats("stats/today").await
    }

    async fn today_products(&self) -> Result<DaySnapshot> {
        self.get_snapshot("products/today").await
    }

    async fn products_for_date(&self, date_key: &str) -> Result<DaySnapshot> {
        self.get_snapshot(&format!("products/{date_key}")).await
    }
}
