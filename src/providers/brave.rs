//! Brave Search adapter (news and web)

use super::{HttpFetcher, NewsItem, NewsProvider, SearchOptions, WebItem, WebSearchProvider};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;

const PROVIDER: &str = "brave";
const DEFAULT_BASE_URL: &str = "https://api.search.brave.com/res/v1";
const MAX_COUNT: usize = 20;

#[derive(Debug, Default, Deserialize)]
struct BraveWebResponse {
    #[serde(default)]
    web: Option<BraveWebSection>,
}

#[derive(Debug, Default, Deserialize)]
struct BraveWebSection {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Default, Deserialize)]
struct BraveNewsResponse {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    age: Option<String>,
    #[serde(default)]
    page_age: Option<String>,
    #[serde(default)]
    meta_url: Option<BraveMetaUrl>,
}

#[derive(Debug, Deserialize)]
struct BraveMetaUrl {
    #[serde(default)]
    hostname: Option<String>,
}

pub struct BraveClient {
    http: HttpFetcher,
    api_key: Option<String>,
    base_url: String,
}

impl BraveClient {
    pub fn new(http: HttpFetcher, api_key: Option<String>) -> Self {
        Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn search<T>(&self, endpoint: &str, query: &str, options: &SearchOptions) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let Some(key) = self.api_key.as_deref() else {
            return Ok(T::default());
        };

        let url = format!("{}/{}/search", self.base_url, endpoint);
        let count = options.limit.clamp(1, MAX_COUNT).to_string();
        let mut params = vec![("q", query), ("count", count.as_str())];
        if let Some(freshness) = options.freshness {
            params.push(("freshness", freshness));
        }

        self.http
            .get_json(
                PROVIDER,
                &url,
                &params,
                &[("Accept", "application/json"), ("X-Subscription-Token", key)],
            )
            .await
    }
}

#[async_trait]
impl NewsProvider for BraveClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search_news(&self, query: &str, options: &SearchOptions) -> Result<Vec<NewsItem>> {
        let response: BraveNewsResponse = self.search("news", query, options).await?;

        Ok(response
            .results
            .into_iter()
            .map(|r| NewsItem {
                title: r.title,
                url: r.url,
                source: r.meta_url.and_then(|m| m.hostname),
                published_at: r.page_age.or(r.age),
                description: r.description,
            })
            .collect())
    }
}

#[async_trait]
impl WebSearchProvider for BraveClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search_web(&self, query: &str, options: &SearchOptions) -> Result<Vec<WebItem>> {
        let response: BraveWebResponse = self.search("web", query, options).await?;

        Ok(response
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .map(|r| WebItem {
                title: r.title,
                url: r.url,
                description: r.description,
                age: r.age,
            })
            .collect())
    }
}
