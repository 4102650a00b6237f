use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use pd_core::types::RawMetrics;
use tracing::debug;

use crate::source::{MetricsSource, SourceError};

/// Fetches daily analytics from a JSON HTTP endpoint:
/// `GET {base_url}/zones/{zone}/analytics/daily?date=YYYY-MM-DD`.
#[derive(Debug, Clone)]
pub struct HttpMetricsSource {
    base_url: String,
    zone: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpMetricsSource {
    pub fn new(
        base_url: &str,
        zone: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        if base_url.is_empty() {
            return Err(SourceError::Config("empty base_url".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            zone: zone.to_string(),
            token,
            client,
        })
    }

    fn daily_url(&self) -> String {
        format!("{}/zones/{}/analytics/daily", self.base_url, self.zone)
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self, date: NaiveDate) -> Result<RawMetrics, SourceError> {
        let day = date.format("%Y-%m-%d").to_string();
        let mut req = self.client.get(self.daily_url()).query(&[("date", day.as_str())]);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        let metrics: RawMetrics =
            serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))?;
        debug!(%date, zone = %self.zone, total_requests = metrics.total_requests, "fetched metrics");
        Ok(metrics)
    }

    fn name(&self) -> &str {
        "http"
    }
}
