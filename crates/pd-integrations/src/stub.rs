use async_trait::async_trait;
use chrono::NaiveDate;
use pd_core::types::{CountMap, RawMetrics};
use tracing::debug;

use crate::source::{MetricsSource, SourceError};

/// Deterministic sample data, the same for every date. Used for local
/// development and as the default provider.
#[derive(Debug, Clone, Default)]
pub struct StaticSource;

impl StaticSource {
    pub fn new() -> Self {
        Self
    }

    pub fn sample() -> RawMetrics {
        let top_countries: CountMap = [("US", 300), ("UK", 100), ("CA", 100)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let top_pages: CountMap = [("/", 400), ("/about", 100)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        RawMetrics {
            total_requests: 1000,
            unique_visitors: 500,
            bandwidth_bytes: 100 * 1024 * 1024,
            top_countries,
            top_pages,
        }
    }
}

#[async_trait]
impl MetricsSource for StaticSource {
    async fn fetch(&self, date: NaiveDate) -> Result<RawMetrics, SourceError> {
        debug!(%date, "serving static sample metrics");
        Ok(Self::sample())
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sample_is_stable_across_dates() {
        let source = StaticSource::new();
        let a = source.fetch(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).await.unwrap();
        let b = source.fetch(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.total_requests, 1000);
        assert_eq!(a.bandwidth_bytes, 104_857_600);
        assert_eq!(a.top_countries["US"], 300);
    }
}
