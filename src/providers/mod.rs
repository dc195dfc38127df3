//! Data and search provider capabilities
//!
//! Each capability is a trait with an availability probe. Adapters without a key
//! report unavailable and return empty results without touching the network;
//! empty upstream payloads become `None`/empty, transport failures propagate.

use crate::config::Config;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod brave;
pub mod fmp;
pub mod http;
pub mod polygon;

pub use brave::BraveClient;
pub use fmp::{FmpClient, FmpLightQuotes};
pub use http::HttpFetcher;
pub use polygon::PolygonClient;

//
// ================= Domain types =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pe: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_close: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
}

impl Quote {
    /// Absolute change, derived from the previous close when the provider omits it
    pub fn effective_change(&self) -> Option<f64> {
        self.change
            .or_else(|| self.previous_close.map(|prev| self.price - prev))
    }

    /// Percent change, derived from the previous close when the provider omits it
    pub fn effective_change_percent(&self) -> Option<f64> {
        self.change_percent.or_else(|| {
            self.previous_close
                .filter(|prev| *prev != 0.0)
                .map(|prev| (self.price - prev) / prev * 100.0)
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebItem {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ChartInterval {
    #[serde(rename = "1min")]
    OneMinute,
    #[default]
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "1hour")]
    OneHour,
}

impl ChartInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartInterval::OneMinute => "1min",
            ChartInterval::FiveMinutes => "5min",
            ChartInterval::FifteenMinutes => "15min",
            ChartInterval::ThirtyMinutes => "30min",
            ChartInterval::OneHour => "1hour",
        }
    }
}

impl fmt::Display for ChartInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Brave freshness code (`pd`, `pw`, `pm`)
    pub freshness: Option<&'static str>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            freshness: None,
        }
    }
}

impl SearchOptions {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit,
            freshness: Some("pw"),
        }
    }
}

//
// ================= Capabilities =================
//

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn is_available(&self) -> bool;
    async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>>;
}

#[async_trait]
pub trait ChartProvider: Send + Sync {
    fn is_available(&self) -> bool;
    async fn get_intraday_chart(&self, ticker: &str, interval: ChartInterval) -> Result<Vec<Candle>>;
}

#[async_trait]
pub trait MoversProvider: Send + Sync {
    fn is_available(&self) -> bool;
    async fn top_gainers(&self) -> Result<Vec<Quote>>;
    async fn top_losers(&self) -> Result<Vec<Quote>>;
    async fn most_active(&self) -> Result<Vec<Quote>>;
}

#[async_trait]
pub trait TickerNewsProvider: Send + Sync {
    fn is_available(&self) -> bool;
    async fn ticker_news(&self, ticker: &str, limit: usize) -> Result<Vec<NewsItem>>;
}

#[async_trait]
pub trait NewsProvider: Send + Sync {
    fn is_available(&self) -> bool;
    async fn search_news(&self, query: &str, options: &SearchOptions) -> Result<Vec<NewsItem>>;
}

#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    fn is_available(&self) -> bool;
    async fn search_web(&self, query: &str, options: &SearchOptions) -> Result<Vec<WebItem>>;
}

/// Which capabilities are currently backed by a configured provider
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub market_data: bool,
    pub light_quotes: bool,
    pub charts: bool,
    pub movers: bool,
    pub ticker_news: bool,
    pub news_search: bool,
    pub web_search: bool,
}

/// The full provider set the executor routes across
#[derive(Clone)]
pub struct Providers {
    pub quotes: Arc<dyn QuoteProvider>,
    pub light_quotes: Arc<dyn QuoteProvider>,
    pub charts: Arc<dyn ChartProvider>,
    pub movers: Arc<dyn MoversProvider>,
    pub ticker_news: Arc<dyn TickerNewsProvider>,
    pub news: Arc<dyn NewsProvider>,
    pub web: Arc<dyn WebSearchProvider>,
}

impl Providers {
    /// Build the real adapters; missing keys yield unavailable adapters
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = HttpFetcher::new(&config.http)?;

        let fmp = Arc::new(FmpClient::new(http.clone(), config.providers.fmp.clone()));
        let polygon = Arc::new(PolygonClient::new(http.clone(), config.providers.polygon.clone()));
        let brave = Arc::new(BraveClient::new(http, config.providers.brave.clone()));

        Ok(Self {
            quotes: fmp.clone(),
            light_quotes: Arc::new(FmpLightQuotes::new(fmp.clone())),
            charts: fmp.clone(),
            movers: fmp,
            ticker_news: polygon,
            news: brave.clone(),
            web: brave,
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            market_data: self.quotes.is_available(),
            light_quotes: self.light_quotes.is_available(),
            charts: self.charts.is_available(),
            movers: self.movers.is_available(),
            ticker_news: self.ticker_news.is_available(),
            news_search: self.news.is_available(),
            web_search: self.web.is_available(),
        }
    }
}
