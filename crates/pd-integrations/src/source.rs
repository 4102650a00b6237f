use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use pd_core::config::{SourceConfig, SourceKind};
use pd_core::types::RawMetrics;
use pd_harness::retry::Retryable;
use thiserror::Error;

use crate::http::HttpMetricsSource;
use crate::stub::StaticSource;

/// Environment variable holding the bearer token for the HTTP provider.
pub const SOURCE_TOKEN_ENV: &str = "PINGDOM_SOURCE_TOKEN";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Failures when fetching analytics from a provider.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Transport-level failure: connect, DNS, timeout, reset.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The provider answered with a non-success status.
    #[error("provider returned {code}: {body}")]
    Status { code: u16, body: String },

    /// The response body was not a valid metrics payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// The source could not be constructed from configuration.
    #[error("source misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::Status {
                code: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            SourceError::Http(e.to_string())
        }
    }
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            SourceError::Http(_) => true,
            SourceError::Status { code, .. } => *code == 429 || *code >= 500,
            SourceError::Decode(_) | SourceError::Config(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Supplies the raw analytics for a single calendar date.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, date: NaiveDate) -> Result<RawMetrics, SourceError>;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}

/// Build the provider selected by `[source]`.
///
/// The HTTP provider's token comes from [`SOURCE_TOKEN_ENV`], never the file.
pub fn source_from_config(cfg: &SourceConfig) -> Result<Arc<dyn MetricsSource>, SourceError> {
    match cfg.kind {
        SourceKind::Static => Ok(Arc::new(StaticSource::new())),
        SourceKind::Http => {
            let base_url = cfg
                .base_url
                .as_deref()
                .ok_or_else(|| SourceError::Config("source.base_url is required".into()))?;
            let token = std::env::var(SOURCE_TOKEN_ENV).ok().filter(|t| !t.is_empty());
            let source = HttpMetricsSource::new(
                base_url,
                &cfg.zone,
                token,
                Duration::from_secs(cfg.timeout_secs),
            )?;
            Ok(Arc::new(source))
        }
    }
}
