//! Environment-driven configuration

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub port: u16,
    pub llm_timeout: Duration,
    pub backoff_base: Duration,
    pub max_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: DEFAULT_MODEL.to_string(),
            port: DEFAULT_PORT,
            llm_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            max_retries: 2,
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// Callers load `.env` first (see the binaries).
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let gemini_api_key = env::var("GEMINI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let gemini_model = env::var("GEMINI_MODEL").unwrap_or(defaults.gemini_model);

        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw.parse::<u16>().map_err(|e| {
                OrchestrationError::ConfigError(format!("Invalid port '{}': {}", raw, e))
            })?,
            Err(_) => defaults.port,
        };

        let llm_timeout = match env::var("LLM_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(parse_number::<u64>("LLM_TIMEOUT_SECS", &raw)?),
            Err(_) => defaults.llm_timeout,
        };

        let backoff_base = match env::var("LLM_BACKOFF_BASE_SECS") {
            Ok(raw) => {
                let secs = parse_number::<f64>("LLM_BACKOFF_BASE_SECS", &raw)?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(OrchestrationError::ConfigError(format!(
                        "LLM_BACKOFF_BASE_SECS must be a non-negative number, got {}",
                        raw
                    )));
                }
                Duration::from_secs_f64(secs)
            }
            Err(_) => defaults.backoff_base,
        };

        let max_retries = match env::var("LLM_MAX_RETRIES") {
            Ok(raw) => parse_number::<u32>("LLM_MAX_RETRIES", &raw)?,
            Err(_) => defaults.max_retries,
        };

        Ok(Self {
            gemini_api_key,
            gemini_model,
            port,
            llm_timeout,
            backoff_base,
            max_retries,
        })
    }

    pub fn credential_present(&self) -> bool {
        self.gemini_api_key.is_some()
    }
}

fn parse_number<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| OrchestrationError::ConfigError(format!("Invalid {} '{}': {}", name, raw, e)))
}
