//! Step-to-intent routing
//!
//! An ordered rule table; the first rule whose keywords appear (and whose
//! ticker requirement is met) decides the intent.

use crate::models::PlanStep;
use crate::providers::ChartInterval;
use crate::ticker::primary_ticker;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Movers,
    Quote,
    Chart,
    News,
    WebSearch,
    Combined,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Movers => "movers",
            Intent::Quote => "quote",
            Intent::Chart => "chart",
            Intent::News => "news",
            Intent::WebSearch => "web_search",
            Intent::Combined => "combined",
        }
    }
}

struct Rule {
    intent: Intent,
    keywords: &'static [&'static str],
    requires_ticker: bool,
}

/// Precedence is the table order
const RULES: &[Rule] = &[
    Rule {
        intent: Intent::Movers,
        keywords: &[
            "movers",
            "gainers",
            "losers",
            "active",
            "top stocks",
            "best performing",
            "worst performing",
        ],
        requires_ticker: false,
    },
    Rule {
        intent: Intent::Quote,
        keywords: &[
            "price",
            "quote",
            "trading",
            "volume",
            "market cap",
            "pe",
            "p/e",
            "eps",
            "metrics",
        ],
        requires_ticker: true,
    },
    Rule {
        intent: Intent::Chart,
        keywords: &[
            "chart",
            "intraday",
            "technical",
            "graph",
            "candlestick",
            "5min",
            "5 min",
        ],
        requires_ticker: true,
    },
    Rule {
        intent: Intent::News,
        keywords: &[
            "news",
            "article",
            "report",
            "announcement",
            "headline",
            "latest",
            "recent",
        ],
        requires_ticker: false,
    },
    Rule {
        intent: Intent::WebSearch,
        keywords: &["company", "about", "website", "info", "search", "find"],
        requires_ticker: false,
    },
];

/// Lowercased text split into words for whole-word keyword checks
pub struct KeywordText {
    lowered: String,
    words: Vec<String>,
}

impl KeywordText {
    pub fn new(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let words = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        Self { lowered, words }
    }

    /// Phrases (anything with a space or symbol) match as substrings;
    /// single words match whole words, with an optional plural `s`.
    pub fn contains(&self, keyword: &str) -> bool {
        if keyword.chars().any(|c| !c.is_alphanumeric()) {
            return self.lowered.contains(keyword);
        }
        self.words.iter().any(|w| {
            w == keyword || w.strip_suffix('s').is_some_and(|stem| stem == keyword)
        })
    }

    pub fn contains_any(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.contains(k))
    }
}

/// Outcome of routing one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub intent: Intent,
    pub ticker: Option<String>,
}

/// Text the router sees: title, description and optional caller context
pub fn step_text(step: &PlanStep, context: Option<&str>) -> String {
    match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!("{} {} {}", step.title, step.description, context),
        None => step.text(),
    }
}

pub fn classify(text: &KeywordText, has_ticker: bool) -> Intent {
    RULES
        .iter()
        .find(|rule| (has_ticker || !rule.requires_ticker) && text.contains_any(rule.keywords))
        .map(|rule| rule.intent)
        .unwrap_or(Intent::Combined)
}

pub fn route(step: &PlanStep, context: Option<&str>) -> Route {
    let text = step_text(step, context);
    let ticker = primary_ticker(&text);
    let intent = classify(&KeywordText::new(&text), ticker.is_some());
    Route { intent, ticker }
}

/// Which mover lists a step asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoverSelection {
    pub gainers: bool,
    pub losers: bool,
    pub actives: bool,
}

pub fn mover_selection(text: &str) -> MoverSelection {
    let text = KeywordText::new(text);
    let gainers = text.contains_any(&["gainer", "winner", "best performing", "up the most"]);
    let losers = text.contains_any(&["loser", "decliner", "worst performing", "down the most"]);
    let actives = text.contains_any(&["active", "most traded"]);

    if !gainers && !losers && !actives {
        return MoverSelection {
            gainers: true,
            losers: true,
            actives: false,
        };
    }
    MoverSelection {
        gainers,
        losers,
        actives,
    }
}

lazy_static! {
    static ref MINUTE_INTERVAL: Regex =
        Regex::new(r"(?i)\b(1|5|15|30)\s*-?\s*min(?:ute)?s?\b").unwrap();
    static ref HOUR_INTERVAL: Regex = Regex::new(r"(?i)\b(?:1\s*-?\s*hour|hourly|1h|60\s*min)").unwrap();
}

/// Candle interval mentioned in the step, 5 minutes when none is
pub fn chart_interval(text: &str) -> ChartInterval {
    if HOUR_INTERVAL.is_match(text) {
        return ChartInterval::OneHour;
    }
    match MINUTE_INTERVAL
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
    {
        Some("1") => ChartInterval::OneMinute,
        Some("15") => ChartInterval::FifteenMinutes,
        Some("30") => ChartInterval::ThirtyMinutes,
        _ => ChartInterval::FiveMinutes,
    }
}
