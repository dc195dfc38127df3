//! Research context rendering for the final answer
//!
//! Every number is pre-rendered as text so the model can quote it directly.
//! Each step's block is capped so one verbose provider cannot crowd out the rest.

use crate::executor::quote_line;
use crate::format;
use crate::models::{truncate_chars, ExecutionResult, ProviderTag};
use crate::providers::{Candle, NewsItem, Quote, WebItem};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write;

pub const BLOCK_CHAR_LIMIT: usize = 2000;
const TOP_NEWS: usize = 5;
const TOP_WEB: usize = 5;
const TOP_CANDLES: usize = 10;
const TOP_MOVERS: usize = 5;

#[derive(Debug, Default, Deserialize)]
struct NewsPayload {
    #[serde(default)]
    articles: Vec<NewsItem>,
}

#[derive(Debug, Default, Deserialize)]
struct WebPayload {
    #[serde(default)]
    results: Vec<WebItem>,
}

#[derive(Debug, Deserialize)]
struct ChartPayload {
    ticker: String,
    interval: String,
    #[serde(default)]
    candles: Vec<Candle>,
}

#[derive(Debug, Default, Deserialize)]
struct MoversPayload {
    #[serde(default)]
    gainers: Option<Vec<Quote>>,
    #[serde(default)]
    losers: Option<Vec<Quote>>,
    #[serde(default)]
    actives: Option<Vec<Quote>>,
}

#[derive(Debug, Default, Deserialize)]
struct CombinedPayload {
    #[serde(default)]
    quote: Option<Quote>,
    #[serde(default)]
    news: Vec<NewsItem>,
    #[serde(default)]
    web: Vec<WebItem>,
}

/// Render all results as one context document
pub fn build_context(results: &[ExecutionResult], now: DateTime<Utc>) -> String {
    if results.is_empty() {
        return "No research data was collected.".to_string();
    }

    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let header = format!(
                "### Step {}: {} (source: {})",
                i + 1,
                result.step.title,
                result.provider
            );
            format!("{}\n{}", header, cap(render_block(result, now)))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn cap(block: String) -> String {
    if block.chars().count() <= BLOCK_CHAR_LIMIT {
        return block;
    }
    let mut capped = truncate_chars(&block, BLOCK_CHAR_LIMIT - 3);
    capped.push_str("...");
    capped
}

fn render_block(result: &ExecutionResult, now: DateTime<Utc>) -> String {
    if let Some(error) = &result.error {
        return format!("Status: FAILED ({}). No data is available from this step.", error);
    }

    let rendered = match result.provider {
        ProviderTag::FmpQuote | ProviderTag::FmpQuoteLight => {
            parse::<Quote>(&result.data).map(|q| quote_block(&q))
        }
        ProviderTag::FmpChart => parse::<ChartPayload>(&result.data).map(|c| chart_block(&c)),
        ProviderTag::PolygonNews | ProviderTag::BraveNews => {
            parse::<NewsPayload>(&result.data).map(|n| news_block(&n.articles, now))
        }
        ProviderTag::BraveWeb => parse::<WebPayload>(&result.data).map(|w| web_block(&w.results)),
        ProviderTag::FmpMovers => parse::<MoversPayload>(&result.data).map(|m| movers_block(&m)),
        ProviderTag::Combined => {
            parse::<CombinedPayload>(&result.data).map(|c| combined_block(&c, now))
        }
    };

    rendered.unwrap_or_else(|| match &result.summary {
        Some(summary) => format!("Summary: {}", summary),
        None => format!("Raw data: {}", result.data),
    })
}

fn parse<T: serde::de::DeserializeOwned>(data: &Value) -> Option<T> {
    serde_json::from_value(data.clone()).ok()
}

fn quote_block(q: &Quote) -> String {
    let mut out = String::new();
    let name = q.name.as_deref().unwrap_or(&q.symbol);
    let _ = writeln!(out, "Quote for {} ({})", name, q.symbol);
    let _ = writeln!(out, "- Price: {}", format::price(q.price));
    if let Some(change) = q.effective_change() {
        let _ = write!(out, "- Change: {}", format::signed(change));
        if let Some(pct) = q.effective_change_percent() {
            let _ = write!(out, " ({})", format::percent(pct));
        }
        out.push('\n');
    }

    let fields: [(&str, Option<String>); 10] = [
        ("Open", q.open.map(format::price)),
        ("Previous close", q.previous_close.map(format::price)),
        (
            "Day range",
            q.day_low
                .zip(q.day_high)
                .map(|(l, h)| format!("{} - {}", format::price(l), format::price(h))),
        ),
        (
            "52-week range",
            q.year_low
                .zip(q.year_high)
                .map(|(l, h)| format!("{} - {}", format::price(l), format::price(h))),
        ),
        ("Volume", q.volume.map(format::compact)),
        ("Average volume", q.avg_volume.map(format::compact)),
        ("Market cap", q.market_cap.map(format::money)),
        ("P/E", q.pe.map(|v| format!("{:.2}", v))),
        ("EPS", q.eps.map(|v| format!("{:.2}", v))),
        ("Exchange", q.exchange.clone()),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            let _ = writeln!(out, "- {}: {}", label, value);
        }
    }
    out.trim_end().to_string()
}

fn chart_block(c: &ChartPayload) -> String {
    if c.candles.is_empty() {
        return format!("No {} candles returned for {}.", c.interval, c.ticker);
    }

    let mut out = format!(
        "{} {} intraday chart, {} candles (most recent first):\n",
        c.ticker,
        c.interval,
        c.candles.len()
    );
    for candle in c.candles.iter().take(TOP_CANDLES) {
        let _ = writeln!(
            out,
            "- {}: open {}, high {}, low {}, close {}, volume {}",
            candle.date,
            format::price(candle.open),
            format::price(candle.high),
            format::price(candle.low),
            format::price(candle.close),
            format::compact(candle.volume)
        );
    }
    out.trim_end().to_string()
}

fn news_line(item: &NewsItem, now: DateTime<Utc>) -> String {
    let mut line = format!("- {}", item.title);
    let age = item
        .published_at
        .as_deref()
        .map(|p| format::age(p, now).unwrap_or_else(|| p.to_string()));
    match (item.source.as_deref(), age) {
        (Some(source), Some(age)) => line.push_str(&format!(" ({}, {})", source, age)),
        (Some(source), None) => line.push_str(&format!(" ({})", source)),
        (None, Some(age)) => line.push_str(&format!(" ({})", age)),
        (None, None) => {}
    }
    if let Some(description) = item.description.as_deref().filter(|d| !d.is_empty()) {
        line.push_str(&format!("\n  {}", truncate_chars(description, 200)));
    }
    line
}

fn news_block(articles: &[NewsItem], now: DateTime<Utc>) -> String {
    if articles.is_empty() {
        return "No news articles were found.".to_string();
    }
    let lines: Vec<String> = articles
        .iter()
        .take(TOP_NEWS)
        .map(|a| news_line(a, now))
        .collect();
    format!("{} news articles, top {}:\n{}", articles.len(), lines.len(), lines.join("\n"))
}

fn web_block(results: &[WebItem]) -> String {
    if results.is_empty() {
        return "No web results were found.".to_string();
    }
    let lines: Vec<String> = results
        .iter()
        .take(TOP_WEB)
        .map(|r| match r.description.as_deref() {
            Some(d) if !d.is_empty() => format!("- {}: {}", r.title, truncate_chars(d, 200)),
            _ => format!("- {}", r.title),
        })
        .collect();
    format!("{} web results, top {}:\n{}", results.len(), lines.len(), lines.join("\n"))
}

fn movers_list(label: &str, list: &[Quote]) -> String {
    if list.is_empty() {
        return format!("{}: none reported", label);
    }
    let lines: Vec<String> = list
        .iter()
        .take(TOP_MOVERS)
        .map(|q| format!("  - {}", quote_line(q)))
        .collect();
    format!("{}:\n{}", label, lines.join("\n"))
}

fn movers_block(m: &MoversPayload) -> String {
    [
        ("Top gainers", &m.gainers),
        ("Top losers", &m.losers),
        ("Most active", &m.actives),
    ]
    .into_iter()
    .filter_map(|(label, list)| list.as_deref().map(|l| movers_list(label, l)))
    .collect::<Vec<_>>()
    .join("\n")
}

fn combined_block(c: &CombinedPayload, now: DateTime<Utc>) -> String {
    let mut parts = Vec::new();
    match &c.quote {
        Some(q) => parts.push(quote_block(q)),
        None => parts.push("Quote: not available".to_string()),
    }
    parts.push(news_block(&c.news, now));
    parts.push(web_block(&c.web));
    parts.join("\n")
}
