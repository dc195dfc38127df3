//! Shared HTTP plumbing for data providers
//!
//! One pooled client, a per-request timeout and a bounded linear-backoff retry.
//! 5xx, 429 and transport failures are retried; other 4xx are not.

use crate::config::HttpSettings;
use crate::error::ResearchError;
use crate::Result;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff,
        })
    }

    /// GET a JSON document, retrying transient failures
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        provider: &'static str,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<T> {
        let mut attempt: u32 = 0;

        loop {
            match self.get_once(provider, url, query, headers).await {
                Ok(body) => {
                    return serde_json::from_str::<T>(&body).map_err(|e| {
                        ResearchError::ProviderError {
                            provider,
                            message: format!("unexpected payload: {}", e),
                        }
                    });
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_backoff * attempt;
                    warn!(
                        provider,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable provider failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(
        &self,
        provider: &'static str,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<String> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(provider, status = status.as_u16(), "Provider responded");

        if !status.is_success() {
            return Err(ResearchError::ProviderStatus {
                provider,
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}
