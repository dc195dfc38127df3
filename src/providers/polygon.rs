//! Polygon.io ticker news adapter

use super::{HttpFetcher, NewsItem, TickerNewsProvider};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;

const PROVIDER: &str = "polygon";
const DEFAULT_BASE_URL: &str = "https://api.polygon.io";

#[derive(Debug, Default, Deserialize)]
struct PolygonNewsResponse {
    #[serde(default)]
    results: Vec<PolygonArticle>,
}

#[derive(Debug, Deserialize)]
struct PolygonArticle {
    title: String,
    article_url: String,
    #[serde(default)]
    published_utc: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    publisher: Option<PolygonPublisher>,
}

#[derive(Debug, Deserialize)]
struct PolygonPublisher {
    #[serde(default)]
    name: Option<String>,
}

impl From<PolygonArticle> for NewsItem {
    fn from(article: PolygonArticle) -> Self {
        NewsItem {
            title: article.title,
            url: article.article_url,
            source: article.publisher.and_then(|p| p.name),
            published_at: article.published_utc,
            description: article.description,
        }
    }
}

pub struct PolygonClient {
    http: HttpFetcher,
    api_key: Option<String>,
    base_url: String,
}

impl PolygonClient {
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
}

#[async_trait]
impl TickerNewsProvider for PolygonClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn ticker_news(&self, ticker: &str, limit: usize) -> Result<Vec<NewsItem>> {
        let Some(key) = self.api_key.as_deref() else {
            return Ok(Vec::new());
        };

        let url = format!("{}/v2/reference/news", self.base_url);
        let ticker = ticker.to_uppercase();
        let limit = limit.to_string();

        let response: PolygonNewsResponse = self
            .http
            .get_json(
                PROVIDER,
                &url,
                &[
                    ("ticker", ticker.as_str()),
                    ("limit", limit.as_str()),
                    ("order", "desc"),
                    ("sort", "published_utc"),
                    ("apiKey", key),
                ],
                &[],
            )
            .await?;

        Ok(response.results.into_iter().map(NewsItem::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_ticker_news_maps_articles() {
        let app = Router::new().route(
            "/v2/reference/news",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let ticker = params.get("ticker").cloned().unwrap_or_default();
                Json(json!({
                    "status": "OK",
                    "results": [{
                        "title": format!("{} beats estimates", ticker),
                        "article_url": "https://example.com/a",
                        "published_utc": "2026-10-18T14:00:00Z",
                        "publisher": { "name": "Benzinga" }
                    }]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let http = HttpFetcher::new(&HttpSettings::default()).unwrap();
        let polygon = PolygonClient::new(http, Some("pk".into()))
            .with_base_url(format!("http://{}", addr));

        let news = polygon.ticker_news("nvda", 5).await.unwrap();
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].title, "NVDA beats estimates");
        assert_eq!(news[0].source.as_deref(), Some("Benzinga"));
        assert!(news[0].description.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_returns_empty() {
        let http = HttpFetcher::new(&HttpSettings::default()).unwrap();
        let polygon = PolygonClient::new(http, None);

        assert!(!polygon.is_available());
        assert!(polygon.ticker_news("AAPL", 5).await.unwrap().is_empty());
    }
}
