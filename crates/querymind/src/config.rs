// querymind/crates/querymind/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

/// Settings for the language-generation backend.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_seconds: u64,
    pub sql_temperature: f32,
    pub answer_temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081/v1".to_string(),
            api_key: None,
            model: "local-llm".to_string(),
            timeout_seconds: 45,
            sql_temperature: 0.5,
            answer_temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub generation: GenerationConfig,
    pub db_connect_timeout_seconds: u64,
    pub session_sweep_interval_seconds: u64,
    pub session_ttl_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Config {
    /// Read configuration from the process environment. Call `dotenvy::dotenv()`
    /// first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("LLM_BASE_URL")
            .context("LLM_BASE_URL environment variable not set. Please set it in your .env file")?;
        let model = env::var("LLM_MODEL")
            .context("LLM_MODEL environment variable not set. Please set it in your .env file")?;
        let api_key = env::var("LLM_API_KEY").ok().filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("LLM_API_KEY not set; requests to the generation backend will be unauthenticated");
        }

        let generation = GenerationConfig {
            base_url,
            api_key,
            model,
            timeout_seconds: env::var("GENERATION_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "45".into())
                .parse()
                .context("GENERATION_TIMEOUT_SECONDS must be an integer")?,
            sql_temperature: env::var("SQL_TEMPERATURE")
                .unwrap_or_else(|_| "0.5".into())
                .parse()
                .context("SQL_TEMPERATURE must be a number")?,
            answer_temperature: env::var("ANSWER_TEMPERATURE")
                .unwrap_or_else(|_| "0.7".into())
                .parse()
                .context("ANSWER_TEMPERATURE must be a number")?,
        };

        Ok(Self {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            api_port: env::var("API_PORT").unwrap_or_else(|_| "8000".into()).parse()?,
            generation,
            db_connect_timeout_seconds: env::var("DB_CONNECT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
            session_sweep_interval_seconds: env::var("SESSION_SWEEP_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "600".into())
                .parse()?,
            session_ttl_seconds: env::var("SESSION_TTL_SECONDS")
                .unwrap_or_else(|_| "1800".into())
                .parse()?,
            request_timeout_seconds: env::var("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "300".into())
                .parse()?,
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        for line in self.summary_lines() {
            info!("{}", line);
        }
    }

    /// Effective settings as log lines, with the API key masked.
    pub fn summary_lines(&self) -> Vec<String> {
        let api_key = self
            .generation
            .api_key
            .as_deref()
            .map(mask_secret)
            .unwrap_or_else(|| "<none>".into());
        vec![
            format!("- API: {}:{}", self.api_host, self.api_port),
            format!("- LLM Endpoint: {}", self.generation.base_url),
            format!("- LLM Model: {}", self.generation.model),
            format!("- LLM API Key: {}", api_key),
            format!("- Generation Timeout: {}s", self.generation.timeout_seconds),
            format!(
                "- Temperatures: sql={} answer={}",
                self.generation.sql_temperature, self.generation.answer_temperature
            ),
            format!("- DB Connect Timeout: {}s", self.db_connect_timeout_seconds),
            format!(
                "- Session Sweep: every {}s, TTL {}s",
                self.session_sweep_interval_seconds, self.session_ttl_seconds
            ),
            format!("- Request Timeout: {}s", self.request_timeout_seconds),
        ]
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("invalid API address {}:{}", self.api_host, self.api_port))
    }

    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.db_connect_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_seconds)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }
}

/// Keep the first and last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", head, tail)
}
