//! Stubs shared by unit tests

use crate::error::ResearchError;
use crate::llm::{CompletionClient, CompletionOptions, LlmConnector, TextStream};
use crate::models::ChatMessage;
use crate::providers::{
    Candle, ChartInterval, ChartProvider, MoversProvider, NewsItem, NewsProvider, Providers, Quote,
    QuoteProvider, SearchOptions, TickerNewsProvider, WebItem, WebSearchProvider,
};
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn sample_quote(symbol: &str) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        name: Some(format!("{} Inc.", symbol)),
        price: 102.5,
        change: Some(2.5),
        change_percent: Some(2.5),
        volume: Some(1_250_000.0),
        market_cap: Some(2_100_000_000_000.0),
        pe: Some(31.2),
        previous_close: Some(100.0),
        exchange: Some("NASDAQ".to_string()),
        ..Default::default()
    }
}

//
// ================= Providers =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubMode {
    Data,
    Empty,
    Failing,
    /// Answers 403, as for an endpoint outside the key's plan
    Rejected,
    Unavailable,
}

/// One deterministic stub that can stand in for any capability
pub struct StubProvider {
    mode: Mutex<StubMode>,
    light: bool,
    calls: AtomicUsize,
}

impl StubProvider {
    fn new(mode: StubMode, light: bool) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            light,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_mode(&self, mode: StubMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_empty(&self) {
        self.set_mode(StubMode::Empty);
    }

    pub fn set_failing(&self) {
        self.set_mode(StubMode::Failing);
    }

    pub fn set_rejected(&self) {
        self.set_mode(StubMode::Rejected);
    }

    pub fn set_unavailable(&self) {
        self.set_mode(StubMode::Unavailable);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn mode(&self) -> StubMode {
        *self.mode.lock().unwrap()
    }

    fn available(&self) -> bool {
        self.mode() != StubMode::Unavailable
    }

    /// Shared call path: `Ok(true)` means produce data
    fn respond(&self) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            StubMode::Data => Ok(true),
            StubMode::Empty | StubMode::Unavailable => Ok(false),
            StubMode::Failing => Err(ResearchError::ProviderStatus {
                provider: "stub",
                status: 503,
            }),
            StubMode::Rejected => Err(ResearchError::ProviderStatus {
                provider: "stub",
                status: 403,
            }),
        }
    }

    fn movers(&self, prefix: &str, sign: f64) -> Result<Vec<Quote>> {
        if !self.respond()? {
            return Ok(Vec::new());
        }
        Ok((1..=3)
            .map(|i| Quote {
                symbol: format!("{}{}", prefix, i),
                price: 10.0 * i as f64,
                change_percent: Some(sign * (10.0 - i as f64)),
                ..Default::default()
            })
            .collect())
    }

    fn news(&self, subject: &str) -> Result<Vec<NewsItem>> {
        if !self.respond()? {
            return Ok(Vec::new());
        }
        Ok((1..=3)
            .map(|i| NewsItem {
                title: format!("{} headline {}", subject, i),
                url: format!("https://news.example/{}", i),
                source: Some("Example Wire".to_string()),
                published_at: Some("2026-10-18T12:00:00Z".to_string()),
                description: Some(format!("Story {} about {}", i, subject)),
            })
            .collect())
    }
}

#[async_trait]
impl QuoteProvider for StubProvider {
    fn is_available(&self) -> bool {
        self.available()
    }

    async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>> {
        if !self.respond()? {
            return Ok(None);
        }
        let mut quote = sample_quote(ticker);
        if self.light {
            quote = Quote {
                symbol: quote.symbol,
                price: quote.price,
                volume: quote.volume,
                ..Default::default()
            };
        }
        Ok(Some(quote))
    }
}

#[async_trait]
impl ChartProvider for StubProvider {
    fn is_available(&self) -> bool {
        self.available()
    }

    async fn get_intraday_chart(&self, _ticker: &str, _interval: ChartInterval) -> Result<Vec<Candle>> {
        if !self.respond()? {
            return Ok(Vec::new());
        }
        Ok((0..3)
            .map(|i| Candle {
                date: format!("2026-10-16 15:{:02}:00", 55 - i * 5),
                open: 100.0 + i as f64,
                high: 101.0 + i as f64,
                low: 99.0 + i as f64,
                close: 100.5 + i as f64,
                volume: 10_000.0,
            })
            .collect())
    }
}

#[async_trait]
impl MoversProvider for StubProvider {
    fn is_available(&self) -> bool {
        self.available()
    }

    async fn top_gainers(&self) -> Result<Vec<Quote>> {
        self.movers("UP", 1.0)
    }

    async fn top_losers(&self) -> Result<Vec<Quote>> {
        self.movers("DN", -1.0)
    }

    async fn most_active(&self) -> Result<Vec<Quote>> {
        self.movers("VOL", 1.0)
    }
}

#[async_trait]
impl TickerNewsProvider for StubProvider {
    fn is_available(&self) -> bool {
        self.available()
    }

    async fn ticker_news(&self, ticker: &str, _limit: usize) -> Result<Vec<NewsItem>> {
        self.news(ticker)
    }
}

#[async_trait]
impl NewsProvider for StubProvider {
    fn is_available(&self) -> bool {
        self.available()
    }

    async fn search_news(&self, query: &str, _options: &SearchOptions) -> Result<Vec<NewsItem>> {
        self.news(query)
    }
}

#[async_trait]
impl WebSearchProvider for StubProvider {
    fn is_available(&self) -> bool {
        self.available()
    }

    async fn search_web(&self, query: &str, _options: &SearchOptions) -> Result<Vec<WebItem>> {
        if !self.respond()? {
            return Ok(Vec::new());
        }
        Ok((1..=3)
            .map(|i| WebItem {
                title: format!("{} result {}", query, i),
                url: format!("https://web.example/{}", i),
                description: Some("Reference page".to_string()),
                age: Some("2 days ago".to_string()),
            })
            .collect())
    }
}

/// A stub per capability; modes can be changed after `providers()` is built
pub struct StubProviders {
    pub quotes: Arc<StubProvider>,
    pub light_quotes: Arc<StubProvider>,
    pub charts: Arc<StubProvider>,
    pub movers: Arc<StubProvider>,
    pub ticker_news: Arc<StubProvider>,
    pub news: Arc<StubProvider>,
    pub web: Arc<StubProvider>,
}

impl StubProviders {
    fn with_mode(mode: StubMode) -> Self {
        Self {
            quotes: StubProvider::new(mode, false),
            light_quotes: StubProvider::new(mode, true),
            charts: StubProvider::new(mode, false),
            movers: StubProvider::new(mode, false),
            ticker_news: StubProvider::new(mode, false),
            news: StubProvider::new(mode, false),
            web: StubProvider::new(mode, false),
        }
    }

    pub fn all() -> Self {
        Self::with_mode(StubMode::Data)
    }

    pub fn none() -> Self {
        Self::with_mode(StubMode::Unavailable)
    }

    /// Only the search providers (news and web) configured
    pub fn search_only() -> Self {
        let stubs = Self::none();
        stubs.news.set_mode(StubMode::Data);
        stubs.web.set_mode(StubMode::Data);
        stubs
    }

    pub fn providers(&self) -> Providers {
        Providers {
            quotes: self.quotes.clone(),
            light_quotes: self.light_quotes.clone(),
            charts: self.charts.clone(),
            movers: self.movers.clone(),
            ticker_news: self.ticker_news.clone(),
            news: self.news.clone(),
            web: self.web.clone(),
        }
    }
}

//
// ================= Completion =================
//

type RecordedCall = (Vec<ChatMessage>, CompletionOptions);

/// Replays canned completions in order and records every request
#[derive(Default)]
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<String>>,
    stream_chunks: Vec<String>,
    stream_fails_after: Option<usize>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedCompletion {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            ..Default::default()
        }
    }

    pub fn with_stream(mut self, chunks: Vec<&str>) -> Self {
        self.stream_chunks = chunks.into_iter().map(String::from).collect();
        self
    }

    /// Yield `n` chunks, then an error item
    pub fn failing_stream_after(mut self, n: usize) -> Self {
        self.stream_fails_after = Some(n);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, messages: &[ChatMessage], options: &CompletionOptions) {
        self.calls
            .lock()
            .unwrap()
            .push((messages.to_vec(), options.clone()));
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        self.record(messages, options);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ResearchError::LlmError("script exhausted".to_string()))
    }

    async fn stream_complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<TextStream> {
        self.record(messages, options);

        let mut items: Vec<Result<String>> = self.stream_chunks.iter().cloned().map(Ok).collect();
        if let Some(n) = self.stream_fails_after {
            items.truncate(n);
            items.push(Err(ResearchError::StreamError("connection reset".to_string())));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Every call fails, as with a rejected key
pub struct FailingCompletion;

#[async_trait]
impl CompletionClient for FailingCompletion {
    async fn complete(&self, _messages: &[ChatMessage], _options: &CompletionOptions) -> Result<String> {
        Err(ResearchError::LlmStatus {
            status: 401,
            message: "invalid key".to_string(),
        })
    }

    async fn stream_complete(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<TextStream> {
        Err(ResearchError::LlmStatus {
            status: 401,
            message: "invalid key".to_string(),
        })
    }
}

/// Hands out the same client for every request and remembers the keys it saw
pub struct StaticConnector {
    client: Arc<dyn CompletionClient>,
    keys: Mutex<Vec<String>>,
}

impl StaticConnector {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            keys: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self::new(Arc::new(FailingCompletion))
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

impl LlmConnector for StaticConnector {
    fn connect(&self, api_key: &str, _model: Option<&str>) -> Arc<dyn CompletionClient> {
        self.keys.lock().unwrap().push(api_key.to_string());
        self.client.clone()
    }
}
