//! Runtime configuration
//!
//! Everything comes from the environment (optionally seeded from `.env`).
//! Data-provider keys are optional: a missing key degrades routing, it never fails startup.

use crate::error::ResearchError;
use crate::Result;
use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_MAX_STEPS: usize = 5;
pub const DEFAULT_MAX_STEPS_CEILING: usize = 10;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct ProviderKeys {
    pub fmp: Option<String>,
    pub polygon: Option<String>,
    pub brave: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub openrouter_api_key: Option<String>,
    pub openrouter_base_url: String,
    pub default_model: String,
    pub default_max_steps: usize,
    pub max_steps_ceiling: usize,
    pub history_limit: usize,
    pub providers: ProviderKeys,
    pub http: HttpSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            openrouter_api_key: None,
            openrouter_base_url: DEFAULT_OPENROUTER_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            default_max_steps: DEFAULT_MAX_STEPS,
            max_steps_ceiling: DEFAULT_MAX_STEPS_CEILING,
            history_limit: DEFAULT_HISTORY_LIMIT,
            providers: ProviderKeys {
                fmp: None,
                polygon: None,
                brave: None,
            },
            http: HttpSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (used by `from_env` and tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Config::default();

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => parse_number::<u16>("PORT", &raw)?,
            None => defaults.port,
        };

        let max_steps_ceiling = match get("RESEARCH_MAX_STEPS_CEILING") {
            Some(raw) => parse_number::<usize>("RESEARCH_MAX_STEPS_CEILING", &raw)?.max(1),
            None => defaults.max_steps_ceiling,
        };

        let default_max_steps = match get("RESEARCH_MAX_STEPS") {
            Some(raw) => parse_number::<usize>("RESEARCH_MAX_STEPS", &raw)?,
            None => defaults.default_max_steps,
        }
        .clamp(1, max_steps_ceiling);

        let mut http = HttpSettings::default();
        if let Some(raw) = get("PROVIDER_TIMEOUT_SECS") {
            http.timeout = Duration::from_secs(parse_number("PROVIDER_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("PROVIDER_MAX_RETRIES") {
            http.max_retries = parse_number("PROVIDER_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = get("PROVIDER_RETRY_BACKOFF_MS") {
            http.retry_backoff =
                Duration::from_millis(parse_number("PROVIDER_RETRY_BACKOFF_MS", &raw)?);
        }

        Ok(Self {
            port,
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_base_url: get("OPENROUTER_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openrouter_base_url),
            default_model: get("OPENROUTER_MODEL").unwrap_or(defaults.default_model),
            default_max_steps,
            max_steps_ceiling,
            history_limit: defaults.history_limit,
            providers: ProviderKeys {
                fmp: get("FMP_API_KEY"),
                polygon: get("POLYGON_API_KEY"),
                brave: get("BRAVE_API_KEY"),
            },
            http,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(|_| {
        ResearchError::ConfigError(format!("{} must be a number, got '{}'", key, raw))
    })
}
