//! Rule-based planner
//!
//! Deterministic plans from a ticker and a few keyword families. Used when
//! the model is unavailable or returns something unusable. Step text is
//! worded so the router sends each step to the intended branch.

use super::Planner;
use crate::models::{ChatMessage, ExecutionResult, PlanStep};
use crate::ticker::primary_ticker;
use async_trait::async_trait;

#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedPlanner;

impl RuleBasedPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(&self, query: &str, max_steps: usize) -> Vec<PlanStep> {
        let lowered = query.to_lowercase();
        let has_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

        let wants_quote = has_any(&["price", "quote"]);
        let wants_news = has_any(&["news"]);
        let wants_market = has_any(&["market", "today"]);

        let mut steps = match primary_ticker(query) {
            Some(ticker) if wants_news && !wants_quote => vec![news_step(&ticker)],
            Some(ticker) => vec![quote_step(&ticker), news_step(&ticker)],
            None if wants_market => vec![PlanStep::new(
                "Market overview",
                "Review overall stock market conditions and sentiment",
            )],
            None => vec![PlanStep::new(
                "Search financial news",
                format!("Recent news on: {}", query.trim()),
            )],
        };

        steps.truncate(max_steps.max(1));
        steps
    }
}

fn quote_step(ticker: &str) -> PlanStep {
    PlanStep::new(
        format!("Get {} stock quote", ticker),
        format!("Fetch the current price, daily change and volume for {}", ticker),
    )
}

fn news_step(ticker: &str) -> PlanStep {
    PlanStep::new(
        format!("Get {} news", ticker),
        format!("Search recent news and announcements about {}", ticker),
    )
}

#[async_trait]
impl Planner for RuleBasedPlanner {
    async fn generate_plan(
        &self,
        query: &str,
        _history: &[ChatMessage],
        max_steps: usize,
    ) -> Vec<PlanStep> {
        self.plan(query, max_steps)
    }

    async fn refine_plan(
        &self,
        _query: &str,
        _completed: &[ExecutionResult],
        _history: &[ChatMessage],
        _max_steps: usize,
    ) -> Vec<PlanStep> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{route, Intent};

    #[test]
    fn test_price_question_gets_quote_and_news() {
        let steps = RuleBasedPlanner::new().plan("What's NVDA's price today?", 5);

        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.text().contains("NVDA")));
        assert_eq!(steps[0].title, "Get NVDA stock quote");
        assert_eq!(steps[1].title, "Get NVDA news");
    }

    #[test]
    fn test_news_question_gets_single_step() {
        let steps = RuleBasedPlanner::new().plan("NVDA news", 5);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].title, "Get NVDA news");
    }

    #[test]
    fn test_bare_ticker_and_market_questions() {
        let planner = RuleBasedPlanner::new();

        assert_eq!(planner.plan("thoughts on AMD?", 5).len(), 2);

        let market = planner.plan("tell me about markets", 5);
        assert_eq!(market.len(), 1);
        assert_eq!(market[0].title, "Market overview");

        let generic = planner.plan("should I refinance my mortgage", 5);
        assert_eq!(generic[0].title, "Search financial news");
    }

    #[test]
    fn test_acronyms_are_not_tickers() {
        let steps = RuleBasedPlanner::new().plan("How is AI affecting the GDP?", 5);
        assert_eq!(steps[0].title, "Search financial news");

        // the query is echoed into the step, so the router must skip the same terms
        let route = route(&steps[0], None);
        assert_eq!(route.ticker, None);
        assert_eq!(route.intent, Intent::News);
    }

    #[test]
    fn test_respects_max_steps() {
        let steps = RuleBasedPlanner::new().plan("AAPL price", 1);
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_planner_trait_never_refines() {
        let planner: &dyn Planner = &RuleBasedPlanner::new();

        let plan = tokio_test::block_on(planner.generate_plan("AAPL price", &[], 5));
        assert_eq!(plan.len(), 2);

        let refined = tokio_test::block_on(planner.refine_plan("AAPL price", &[], &[], 5));
        assert!(refined.is_empty());
    }
}
