//! Step execution against data providers
//!
//! Each step is routed to an intent, then walked down that intent's provider
//! fallback chain. Errors never escape `execute_step`; they become a failed
//! `ExecutionResult` with null data.

use crate::error::ResearchError;
use crate::format;
use crate::models::{ExecutionResult, PlanStep, ProviderTag};
use crate::observability::{ObservedEvent, Observer};
use crate::providers::{Candle, NewsItem, Providers, Quote, SearchOptions, WebItem};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub mod router;

pub use router::{route, Intent, Route};

const NEWS_LIMIT: usize = 10;
const WEB_LIMIT: usize = 8;
const COMBINED_LIMIT: usize = 5;
const MOVERS_LIMIT: usize = 10;
const MOVERS_NEWS_QUERY: &str = "stock market movers today";

/// Callback after each step: `(index, total, result)`
pub type ProgressCallback<'a> = &'a (dyn Fn(usize, usize, &ExecutionResult) + Send + Sync);

/// Successful branch output before it is wrapped into a result
struct Outcome {
    provider: ProviderTag,
    data: Value,
    summary: String,
}

impl Outcome {
    fn new(provider: ProviderTag, data: Value, summary: String) -> Self {
        Self {
            provider,
            data,
            summary,
        }
    }
}

pub struct Executor {
    providers: Providers,
    observer: Arc<dyn Observer>,
}

impl Executor {
    pub fn new(providers: Providers, observer: Arc<dyn Observer>) -> Self {
        Self {
            providers,
            observer,
        }
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    /// Route and run one step. Never fails; errors land in `ExecutionResult::error`.
    pub async fn execute_step(&self, step: &PlanStep, context: Option<&str>) -> ExecutionResult {
        let route = route(step, context);
        let started = Instant::now();

        self.observer.record(ObservedEvent::new(
            "executor",
            "step_routed",
            json!({
                "title": step.title,
                "intent": route.intent.as_str(),
                "ticker": route.ticker,
            }),
        ));

        match self.dispatch(step, &route).await {
            Ok(outcome) => {
                debug!(
                    intent = route.intent.as_str(),
                    provider = %outcome.provider,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Step executed"
                );
                ExecutionResult::success(step.clone(), outcome.provider, outcome.data, outcome.summary)
            }
            Err(e) => {
                let provider = self.primary_provider(&route);
                warn!(
                    intent = route.intent.as_str(),
                    provider = %provider,
                    error = %e,
                    "Step failed"
                );
                self.observer.record(ObservedEvent::new(
                    "executor",
                    "step_failed",
                    json!({ "title": step.title, "provider": provider, "error": e.to_string() }),
                ));
                ExecutionResult::failure(step.clone(), provider, e.public_message())
            }
        }
    }

    /// Run steps one after another, reporting after each
    pub async fn execute_steps(
        &self,
        steps: &[PlanStep],
        on_progress: Option<ProgressCallback<'_>>,
    ) -> Vec<ExecutionResult> {
        let total = steps.len();
        let mut results = Vec::with_capacity(total);

        for (index, step) in steps.iter().enumerate() {
            let result = self.execute_step(step, None).await;
            if let Some(callback) = on_progress {
                callback(index, total, &result);
            }
            results.push(result);
        }

        results
    }

    async fn dispatch(&self, step: &PlanStep, route: &Route) -> Result<Outcome> {
        let ticker = route.ticker.as_deref();
        match (route.intent, ticker) {
            (Intent::Movers, _) => self.movers(step).await,
            (Intent::Quote, Some(ticker)) => self.quote(ticker).await,
            (Intent::Chart, Some(ticker)) => self.chart(ticker, &step.text()).await,
            (Intent::News, Some(ticker)) => self.ticker_news(ticker).await,
            (Intent::News, None) => self.general_news(&search_query(step)).await,
            (Intent::WebSearch, _) => self.web(&search_query(step)).await,
            (Intent::Combined, Some(ticker)) => self.combined_ticker(ticker).await,
            // quote/chart rules only fire with a ticker
            (Intent::Quote | Intent::Chart | Intent::Combined, None) => {
                self.combined_text(&search_query(step)).await
            }
        }
    }

    /// Tag reported on a failed step: the first tier of its chain
    fn primary_provider(&self, route: &Route) -> ProviderTag {
        match (route.intent, route.ticker.is_some()) {
            (Intent::Movers, _) => ProviderTag::FmpMovers,
            (Intent::Quote, true) => ProviderTag::FmpQuote,
            (Intent::Chart, true) => ProviderTag::FmpChart,
            (Intent::News, true) if self.providers.ticker_news.is_available() => {
                ProviderTag::PolygonNews
            }
            (Intent::News, _) => ProviderTag::BraveNews,
            (Intent::WebSearch, _) => ProviderTag::BraveWeb,
            _ => ProviderTag::Combined,
        }
    }

    //
    // ================= Quote =================
    //

    async fn quote(&self, ticker: &str) -> Result<Outcome> {
        let p = &self.providers;
        let mut rejected = None;

        if p.quotes.is_available() {
            if let Some(quote) = next_tier("quote", p.quotes.get_quote(ticker).await, &mut rejected)? {
                return Ok(quote_outcome(ProviderTag::FmpQuote, quote));
            }
        }

        if p.light_quotes.is_available() {
            let light = p.light_quotes.get_quote(ticker).await;
            if let Some(quote) = next_tier("light quote", light, &mut rejected)? {
                return Ok(quote_outcome(ProviderTag::FmpQuoteLight, quote));
            }
        }

        if p.web.is_available() {
            return self.web(&format!("{} stock price quote", ticker)).await;
        }

        if let Some(e) = rejected {
            return Err(e);
        }
        if p.quotes.is_available() || p.light_quotes.is_available() {
            return Err(ResearchError::NoData(format!("No quote data found for {}", ticker)));
        }
        Err(ResearchError::ProviderUnavailable("market data"))
    }

    //
    // ================= Chart =================
    //

    async fn chart(&self, ticker: &str, text: &str) -> Result<Outcome> {
        let p = &self.providers;
        let interval = router::chart_interval(text);
        let mut rejected = None;

        if p.charts.is_available() {
            let fetched = p.charts.get_intraday_chart(ticker, interval).await;
            let candles = next_tier("chart", fetched, &mut rejected)?;
            if !candles.is_empty() {
                let summary = chart_summary(ticker, interval.as_str(), &candles);
                return Ok(Outcome::new(
                    ProviderTag::FmpChart,
                    json!({ "ticker": ticker, "interval": interval, "candles": candles }),
                    summary,
                ));
            }
        }

        if p.web.is_available() {
            return self
                .web(&format!("{} stock chart technical analysis", ticker))
                .await;
        }

        if let Some(e) = rejected {
            return Err(e);
        }
        if p.charts.is_available() {
            return Err(ResearchError::NoData(format!("No {} chart data found for {}", interval, ticker)));
        }
        Err(ResearchError::ProviderUnavailable("chart data"))
    }

    //
    // ================= News =================
    //

    async fn ticker_news(&self, ticker: &str) -> Result<Outcome> {
        let p = &self.providers;
        let mut rejected = None;

        if p.ticker_news.is_available() {
            let fetched = p.ticker_news.ticker_news(ticker, NEWS_LIMIT).await;
            let articles = next_tier("ticker news", fetched, &mut rejected)?;
            if !articles.is_empty() || (!p.news.is_available() && rejected.is_none()) {
                return Ok(news_outcome(ProviderTag::PolygonNews, ticker, articles));
            }
        }

        if p.news.is_available() {
            let query = format!("{} stock news", ticker);
            let articles = p.news.search_news(&query, &SearchOptions::recent(NEWS_LIMIT)).await?;
            return Ok(news_outcome(ProviderTag::BraveNews, &query, articles));
        }

        if let Some(e) = rejected {
            return Err(e);
        }
        Ok(Outcome::new(
            ProviderTag::BraveNews,
            json!({ "query": ticker, "articles": [] }),
            format!("No news providers are configured for {}", ticker),
        ))
    }

    async fn general_news(&self, query: &str) -> Result<Outcome> {
        let news = &self.providers.news;
        if !news.is_available() {
            return Err(ResearchError::ProviderUnavailable("news search"));
        }
        let articles = news.search_news(query, &SearchOptions::recent(NEWS_LIMIT)).await?;
        Ok(news_outcome(ProviderTag::BraveNews, query, articles))
    }

    //
    // ================= Web =================
    //

    async fn web(&self, query: &str) -> Result<Outcome> {
        let web = &self.providers.web;
        if !web.is_available() {
            return Err(ResearchError::ProviderUnavailable("web search"));
        }

        let results = web
            .search_web(query, &SearchOptions { limit: WEB_LIMIT, freshness: None })
            .await?;
        let summary = match results.first() {
            Some(top) => format!(
                "Found {} web results for \"{}\"; top: {}",
                results.len(),
                query,
                top.title
            ),
            None => format!("No web results found for \"{}\"", query),
        };

        Ok(Outcome::new(
            ProviderTag::BraveWeb,
            json!({ "query": query, "results": results }),
            summary,
        ))
    }

    //
    // ================= Movers =================
    //

    async fn movers(&self, step: &PlanStep) -> Result<Outcome> {
        let p = &self.providers;

        if p.movers.is_available() {
            let selection = router::mover_selection(&step.text());
            let movers = &p.movers;

            let (gainers, losers, actives) = tokio::join!(
                async {
                    if selection.gainers {
                        Some(degrade("gainers", movers.top_gainers().await))
                    } else {
                        None
                    }
                },
                async {
                    if selection.losers {
                        Some(degrade("losers", movers.top_losers().await))
                    } else {
                        None
                    }
                },
                async {
                    if selection.actives {
                        Some(degrade("actives", movers.most_active().await))
                    } else {
                        None
                    }
                },
            );

            let lists = [("gainers", gainers), ("losers", losers), ("actives", actives)];
            if lists.iter().any(|(_, l)| l.as_ref().is_some_and(|l| !l.is_empty())) {
                let mut data = serde_json::Map::new();
                let mut parts = Vec::new();
                for (name, list) in lists {
                    let Some(mut list) = list else { continue };
                    list.truncate(MOVERS_LIMIT);
                    parts.push(movers_part(name, &list));
                    data.insert(name.to_string(), json!(list));
                }
                return Ok(Outcome::new(
                    ProviderTag::FmpMovers,
                    Value::Object(data),
                    parts.join("; "),
                ));
            }
        }

        if p.news.is_available() {
            let articles = p
                .news
                .search_news(MOVERS_NEWS_QUERY, &SearchOptions::recent(NEWS_LIMIT))
                .await?;
            return Ok(news_outcome(ProviderTag::BraveNews, MOVERS_NEWS_QUERY, articles));
        }

        if p.movers.is_available() {
            return Err(ResearchError::NoData("No market movers data available".to_string()));
        }
        Err(ResearchError::ProviderUnavailable("market movers"))
    }

    //
    // ================= Combined =================
    //

    async fn combined_ticker(&self, ticker: &str) -> Result<Outcome> {
        let p = &self.providers;
        if !(p.quotes.is_available()
            || p.light_quotes.is_available()
            || p.ticker_news.is_available()
            || p.news.is_available()
            || p.web.is_available())
        {
            return Err(ResearchError::ProviderUnavailable("research"));
        }

        let web_query = format!("{} company overview", ticker);
        let (quote, news, web) = tokio::join!(
            self.best_quote(ticker),
            self.best_ticker_news(ticker),
            self.web_part(&web_query),
        );

        let mut parts = Vec::new();
        if let Some(q) = &quote {
            parts.push(quote_line(q));
        }
        parts.push(format!("{} news articles", news.len()));
        parts.push(format!("{} web results", web.len()));

        Ok(Outcome::new(
            ProviderTag::Combined,
            json!({ "ticker": ticker, "quote": quote, "news": news, "web": web }),
            parts.join("; "),
        ))
    }

    async fn combined_text(&self, query: &str) -> Result<Outcome> {
        let p = &self.providers;
        if !(p.news.is_available() || p.web.is_available()) {
            return Err(ResearchError::ProviderUnavailable("news and web search"));
        }

        let (news, web) = tokio::join!(self.news_part(query), self.web_part(query));
        let summary = format!(
            "Found {} news articles and {} web results for \"{}\"",
            news.len(),
            web.len(),
            query
        );

        Ok(Outcome::new(
            ProviderTag::Combined,
            json!({ "query": query, "news": news, "web": web }),
            summary,
        ))
    }

    async fn best_quote(&self, ticker: &str) -> Option<Quote> {
        let p = &self.providers;
        if p.quotes.is_available() {
            if let Some(q) = degrade("quote", p.quotes.get_quote(ticker).await) {
                return Some(q);
            }
        }
        if p.light_quotes.is_available() {
            return degrade("light quote", p.light_quotes.get_quote(ticker).await);
        }
        None
    }

    async fn best_ticker_news(&self, ticker: &str) -> Vec<NewsItem> {
        let p = &self.providers;
        if p.ticker_news.is_available() {
            let mut items = degrade("ticker news", p.ticker_news.ticker_news(ticker, COMBINED_LIMIT).await);
            if !items.is_empty() {
                items.truncate(COMBINED_LIMIT);
                return items;
            }
        }
        self.news_part(&format!("{} stock news", ticker)).await
    }

    async fn news_part(&self, query: &str) -> Vec<NewsItem> {
        let news = &self.providers.news;
        if !news.is_available() {
            return Vec::new();
        }
        let mut items = degrade("news", news.search_news(query, &SearchOptions::recent(COMBINED_LIMIT)).await);
        items.truncate(COMBINED_LIMIT);
        items
    }

    async fn web_part(&self, query: &str) -> Vec<WebItem> {
        let web = &self.providers.web;
        if !web.is_available() {
            return Vec::new();
        }
        let options = SearchOptions {
            limit: COMBINED_LIMIT,
            freshness: None,
        };
        let mut items = degrade("web", web.search_web(query, &options).await);
        items.truncate(COMBINED_LIMIT);
        items
    }
}

/// Fan-out parts degrade to empty instead of failing the step
fn degrade<T: Default>(part: &'static str, result: Result<T>) -> T {
    result.unwrap_or_else(|e| {
        warn!(part, error = %e, "Combined fetch part failed");
        T::default()
    })
}

/// A rejected tier reads as "no data" so the chain moves on; the rejection is
/// kept in case no later tier answers. Retryable failures still fail the step.
fn next_tier<T: Default>(
    tier: &'static str,
    result: Result<T>,
    rejected: &mut Option<ResearchError>,
) -> Result<T> {
    match result {
        Err(e) if e.is_rejection() => {
            warn!(tier, error = %e, "Provider rejected the request, trying the next tier");
            *rejected = Some(e);
            Ok(T::default())
        }
        other => other,
    }
}

/// Free-text query for search branches: the description, or the title if empty
fn search_query(step: &PlanStep) -> String {
    if step.description.trim().is_empty() {
        step.title.clone()
    } else {
        step.description.clone()
    }
}

fn quote_outcome(provider: ProviderTag, quote: Quote) -> Outcome {
    let summary = quote_line(&quote);
    Outcome::new(provider, json!(quote), summary)
}

/// `NVDA: $875.28 (+18.33, +2.14%), volume 41.20M, market cap $2.16T`
pub fn quote_line(quote: &Quote) -> String {
    let mut line = format!("{}: {}", quote.symbol, format::price(quote.price));

    match (quote.effective_change(), quote.effective_change_percent()) {
        (Some(change), Some(pct)) => {
            line.push_str(&format!(" ({}, {})", format::signed(change), format::percent(pct)))
        }
        (None, Some(pct)) => line.push_str(&format!(" ({})", format::percent(pct))),
        _ => {}
    }
    if let Some(volume) = quote.volume {
        line.push_str(&format!(", volume {}", format::compact(volume)));
    }
    if let Some(cap) = quote.market_cap {
        line.push_str(&format!(", market cap {}", format::money(cap)));
    }
    line
}

fn chart_summary(ticker: &str, interval: &str, candles: &[Candle]) -> String {
    let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    // candles arrive newest first
    let latest = &candles[0];
    format!(
        "{} {} chart: {} candles, latest close {} at {}, range {} - {}",
        ticker,
        interval,
        candles.len(),
        format::price(latest.close),
        latest.date,
        format::price(low),
        format::price(high)
    )
}

fn news_outcome(provider: ProviderTag, query: &str, articles: Vec<NewsItem>) -> Outcome {
    let summary = match articles.first() {
        Some(top) => format!(
            "Found {} news articles for {}; latest: {}",
            articles.len(),
            query,
            top.title
        ),
        None => format!("No recent news found for {}", query),
    };
    Outcome::new(provider, json!({ "query": query, "articles": articles }), summary)
}

fn movers_part(name: &str, list: &[Quote]) -> String {
    let leaders: Vec<String> = list
        .iter()
        .take(3)
        .map(|q| match q.effective_change_percent() {
            Some(pct) => format!("{} {}", q.symbol, format::percent(pct)),
            None => q.symbol.clone(),
        })
        .collect();

    if leaders.is_empty() {
        format!("no {}", name)
    } else {
        format!("{} {} (top: {})", list.len(), name, leaders.join(", "))
    }
}
