//! Ticker extraction from free text
//!
//! A ticker is a 2-5 letter all-caps word. Common finance acronyms that look
//! like tickers are excluded.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TICKER_PATTERN: Regex = Regex::new(r"\b[A-Z]{2,5}\b").unwrap();
}

/// Acronyms that are never treated as tickers, in questions or in step text
pub const NON_TICKERS: &[&str] = &[
    "AI", "IT", "US", "UK", "EU", "CEO", "CFO", "CTO", "IPO", "ETF", "API", "URL", "USD", "NYSE",
    "NASDAQ", "GDP", "CPI", "FOMC", "SEC", "ESG", "EPS", "ATH", "YOLO", "FOMO", "DD", "OK", "ASAP",
];

/// All candidate tickers in order of first appearance, deduplicated, denylist removed.
/// Input must be in its original case.
pub fn extract_tickers(text: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();

    for m in TICKER_PATTERN.find_iter(text) {
        let token = m.as_str();
        if NON_TICKERS.contains(&token) {
            continue;
        }
        if !seen.iter().any(|t| t == token) {
            seen.push(token.to_string());
        }
    }

    seen
}

/// The first surviving ticker
pub fn primary_ticker(text: &str) -> Option<String> {
    extract_tickers(text).into_iter().next()
}
