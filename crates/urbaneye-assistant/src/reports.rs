//! Report source: the "my reports" query against the UrbanEye backend.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use urbaneye_core::config::ReportsConfig;
use urbaneye_core::{Report, ReportList};

/// Path of the authenticated user's report list.
const MY_REPORTS_PATH: &str = "/api/v1/reports/my";

/// Error type for report fetches.
#[derive(Debug, thiserror::Error)]
pub enum ReportSourceError {
    #[error("not signed in")]
    Unauthenticated,
    #[error("network error: {0}")]
    Network(String),
    #[error("backend returned {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Supplies the signed-in user's reports, newest first.
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn my_reports(&self) -> Result<Vec<Report>, ReportSourceError>;

    /// Install the bearer token of the signed-in user, or clear it on logout.
    ///
    /// Sources that do not authenticate ignore it.
    fn set_token(&self, _token: Option<String>) {}
}

// ---------------------------------------------------------------------------
// HttpReportSource
// ---------------------------------------------------------------------------

/// Fetches reports from the backend over HTTP with a bearer token.
pub struct HttpReportSource {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpReportSource {
    pub fn new(config: &ReportsConfig, token: Option<String>) -> Result<Self, ReportSourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ReportSourceError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: RwLock::new(token.filter(|t| !t.is_empty())),
        })
    }

    /// The bearer token currently in use.
    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, MY_REPORTS_PATH)
    }
}

#[async_trait]
impl ReportSource for HttpReportSource {
    async fn my_reports(&self) -> Result<Vec<Report>, ReportSourceError> {
        let token = self.token().ok_or(ReportSourceError::Unauthenticated)?;

        tracing::debug!(url = %self.url(), "Fetching user reports");

        let response = self
            .client
            .get(self.url())
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ReportSourceError::Network(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED => return Err(ReportSourceError::Unauthenticated),
            status => return Err(ReportSourceError::Status(status.as_u16())),
        }

        let list: ReportList = response
            .json()
            .await
            .map_err(|e| ReportSourceError::Decode(e.to_string()))?;

        tracing::debug!(count = list.reports.len(), "User reports fetched");
        Ok(list.reports)
    }

    fn set_token(&self, token: Option<String>) {
        let token = token.filter(|t| !t.is_empty());
        tracing::debug!(signed_in = token.is_some(), "Report source credentials updated");
        let mut current = self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = token;
    }
}

// ---------------------------------------------------------------------------
// StaticReportSource
// ---------------------------------------------------------------------------

/// In-memory report source for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticReportSource {
    reports: Vec<Report>,
    fail: bool,
}

impl StaticReportSource {
    pub fn new(reports: Vec<Report>) -> Self {
        Self {
            reports,
            fail: false,
        }
    }

    /// A source whose every fetch fails with a network error.
    pub fn failing() -> Self {
        Self {
            reports: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl ReportSource for StaticReportSource {
    async fn my_reports(&self) -> Result<Vec<Report>, ReportSourceError> {
        if self.fail {
            return Err(ReportSourceError::Network(
                "report backend unreachable".to_string(),
            ));
        }
        Ok(self.reports.clone())
    }
}
