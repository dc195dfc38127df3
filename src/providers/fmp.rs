//! Financial Modeling Prep adapter
//!
//! Backs quotes (full and short), intraday candles and market movers.

use super::{Candle, ChartInterval, ChartProvider, HttpFetcher, MoversProvider, Quote, QuoteProvider};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const PROVIDER: &str = "fmp";
const DEFAULT_BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpQuote {
    symbol: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    change: Option<f64>,
    #[serde(default)]
    changes_percentage: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    avg_volume: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    pe: Option<f64>,
    #[serde(default)]
    eps: Option<f64>,
    #[serde(default)]
    open: Option<f64>,
    #[serde(default)]
    previous_close: Option<f64>,
    #[serde(default)]
    day_low: Option<f64>,
    #[serde(default)]
    day_high: Option<f64>,
    #[serde(default)]
    year_low: Option<f64>,
    #[serde(default)]
    year_high: Option<f64>,
    #[serde(default)]
    exchange: Option<String>,
}

impl FmpQuote {
    /// Rows without a price carry nothing worth reporting
    fn into_quote(self) -> Option<Quote> {
        let price = self.price?;
        Some(Quote {
            symbol: self.symbol,
            name: self.name,
            price,
            change: self.change,
            change_percent: self.changes_percentage,
            volume: self.volume,
            avg_volume: self.avg_volume,
            market_cap: self.market_cap,
            pe: self.pe,
            eps: self.eps,
            open: self.open,
            previous_close: self.previous_close,
            day_low: self.day_low,
            day_high: self.day_high,
            year_low: self.year_low,
            year_high: self.year_high,
            exchange: self.exchange,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FmpShortQuote {
    symbol: String,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FmpCandle {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
}

pub struct FmpClient {
    http: HttpFetcher,
    api_key: Option<String>,
    base_url: String,
}

impl FmpClient {
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

    async fn get<T: serde::de::DeserializeOwned + Default>(&self, path: &str) -> Result<T> {
        let Some(key) = self.api_key.as_deref() else {
            return Ok(T::default());
        };
        let url = format!("{}{}", self.base_url, path);
        self.http
            .get_json(PROVIDER, &url, &[("apikey", key)], &[])
            .await
    }

    async fn movers(&self, list: &str) -> Result<Vec<Quote>> {
        let rows: Vec<FmpQuote> = self.get(&format!("/stock_market/{}", list)).await?;
        Ok(rows.into_iter().filter_map(FmpQuote::into_quote).collect())
    }

    pub(crate) async fn get_short_quote(&self, ticker: &str) -> Result<Option<Quote>> {
        let rows: Vec<FmpShortQuote> = self
            .get(&format!("/quote-short/{}", ticker.to_uppercase()))
            .await?;

        Ok(rows.into_iter().next().and_then(|row| {
            row.price.map(|price| Quote {
                symbol: row.symbol,
                price,
                volume: row.volume,
                ..Default::default()
            })
        }))
    }
}

#[async_trait]
impl QuoteProvider for FmpClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>> {
        let rows: Vec<FmpQuote> = self
            .get(&format!("/quote/{}", ticker.to_uppercase()))
            .await?;
        debug!(ticker, rows = rows.len(), "FMP quote fetched");
        Ok(rows.into_iter().next().and_then(FmpQuote::into_quote))
    }
}

#[async_trait]
impl ChartProvider for FmpClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get_intraday_chart(&self, ticker: &str, interval: ChartInterval) -> Result<Vec<Candle>> {
        let rows: Vec<FmpCandle> = self
            .get(&format!(
                "/historical-chart/{}/{}",
                interval.as_str(),
                ticker.to_uppercase()
            ))
            .await?;

        Ok(rows
            .into_iter()
            .map(|c| Candle {
                date: c.date,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume.unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl MoversProvider for FmpClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn top_gainers(&self) -> Result<Vec<Quote>> {
        self.movers("gainers").await
    }

    async fn top_losers(&self) -> Result<Vec<Quote>> {
        self.movers("losers").await
    }

    async fn most_active(&self) -> Result<Vec<Quote>> {
        self.movers("actives").await
    }
}

/// Price-and-volume quotes from the cheaper `quote-short` endpoint
pub struct FmpLightQuotes {
    inner: Arc<FmpClient>,
}

impl FmpLightQuotes {
    pub fn new(inner: Arc<FmpClient>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl QuoteProvider for FmpLightQuotes {
    fn is_available(&self) -> bool {
        self.inner.api_key.is_some()
    }

    async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>> {
        self.inner.get_short_quote(ticker).await
    }
}
