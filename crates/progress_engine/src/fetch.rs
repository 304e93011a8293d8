use std::time::Duration;

use progress_logging::progress_debug;
use serde::Deserialize;

use crate::{FailureKind, FetchError};

const LOGS_PATH: &str = "/api/logs";

#[derive(Debug, Clone)]
pub struct LogFetchSettings {
    pub base_url: String,
    /// Size of the tail window requested per poll. The server caps it at 200.
    pub lines: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for LogFetchSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5173".to_string(),
            lines: 50,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Source of the shared server log tail, oldest line first.
#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch_tail(&self, filter: Option<&str>) -> Result<Vec<String>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    logs: Vec<String>,
}

/// Reads `GET /api/logs?lines=N&filter=<token>` from the backend.
#[derive(Debug, Clone)]
pub struct HttpLogSource {
    settings: LogFetchSettings,
    endpoint: reqwest::Url,
    client: reqwest::Client,
}

impl HttpLogSource {
    pub fn new(settings: LogFetchSettings) -> Result<Self, FetchError> {
        let endpoint = reqwest::Url::parse(&settings.base_url)
            .and_then(|base| base.join(LOGS_PATH))
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            settings,
            endpoint,
            client,
        })
    }

    fn request_url(&self, filter: Option<&str>) -> reqwest::Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("lines", &self.settings.lines.to_string());
            if let Some(filter) = filter.filter(|f| !f.is_empty()) {
                query.append_pair("filter", filter);
            }
        }
        url
    }
}

#[async_trait::async_trait]
impl LogSource for HttpLogSource {
    async fn fetch_tail(&self, filter: Option<&str>) -> Result<Vec<String>, FetchError> {
        let response = self
            .client
            .get(self.request_url(filter))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        let parsed: LogsResponse = serde_json::from_slice(&body)
            .map_err(|err| FetchError::new(FailureKind::InvalidBody, err.to_string()))?;

        if !parsed.ok {
            progress_debug!("log endpoint answered ok=false, treating as empty tail");
            return Ok(Vec::new());
        }
        Ok(parsed.logs)
    }
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
