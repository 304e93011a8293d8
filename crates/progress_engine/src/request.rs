use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::cache::{generate_key, CacheManager};
use crate::fetch::map_reqwest_error;
use crate::{FailureKind, FetchError};

/// GETs JSON from the AI backend, memoized per URL in an injected cache.
pub struct CachedJsonClient {
    client: reqwest::Client,
    cache: Arc<CacheManager<Value>>,
    ttl: Option<Duration>,
}

impl CachedJsonClient {
    pub fn new(
        cache: Arc<CacheManager<Value>>,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            client,
            cache,
            ttl: None,
        })
    }

    /// Overrides the cache's default TTL for entries written by this client.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn cache_key(url: &str) -> String {
        generate_key("api", &json!({ "url": url }))
    }

    pub async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let key = Self::cache_key(url);
        self.cache
            .with_cache(&key, self.ttl, || self.fetch_json(url))
            .await
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let response = self
            .client
            .get(parsed)
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
        serde_json::from_slice(&body)
            .map_err(|err| FetchError::new(FailureKind::InvalidBody, err.to_string()))
    }
}
