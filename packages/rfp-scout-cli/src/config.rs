use anyhow::{Context, Result};
use dotenvy::dotenv;
use rfp_scout::oracle::SecretString;
use rfp_scout::PipelineConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "sqlite://rfp_scout.db?mode=rwc";
const DEFAULT_ORACLE_MODEL: &str = "gpt-4o-mini";

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub oracle_api_key: Option<SecretString>,
    pub oracle_base_url: Option<String>,
    pub oracle_model: String,
    pub user_agent: Option<String>,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig::default()
            .with_concurrency(parse_var("SCOUT_CONCURRENCY", defaults.concurrency)?)
            .with_fetch_timeout(Duration::from_secs(parse_var(
                "FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )?))
            .with_oracle_timeout(Duration::from_secs(parse_var(
                "ORACLE_TIMEOUT_SECS",
                defaults.oracle_timeout.as_secs(),
            )?))
            .with_requests_per_second(parse_var(
                "REQUESTS_PER_SECOND",
                defaults.requests_per_second,
            )?);

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            oracle_api_key: env::var("ORACLE_API_KEY")
                .or_else(|_| env::var("OPENAI_API_KEY"))
                .ok()
                .filter(|key| !key.trim().is_empty())
                .map(SecretString::from),
            oracle_base_url: env::var("ORACLE_BASE_URL").ok(),
            oracle_model: env::var("ORACLE_MODEL")
                .unwrap_or_else(|_| DEFAULT_ORACLE_MODEL.to_string()),
            user_agent: env::var("SCOUT_USER_AGENT").ok(),
            pipeline,
        })
    }

    /// The oracle key, required by commands that resolve or classify.
    pub fn require_api_key(&self) -> Result<&SecretString> {
        self.oracle_api_key
            .as_ref()
            .context("ORACLE_API_KEY (or OPENAI_API_KEY) must be set")
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}
