use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::EngineConfig;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Root of the file-backed document store (`<data_dir>/postings`,
    /// `<data_dir>/profiles`).
    pub data_dir: String,
    /// Swap the file-backed store for the in-memory one (documents live only
    /// as long as the process). Set EPHEMERAL_STORE=true.
    pub ephemeral_store: bool,
    /// Upper bound on ids an evaluator may pick per run.
    pub max_picks: usize,
    /// Worker-pool bound for concurrent evaluator runs.
    pub max_concurrency: usize,
    /// Per-completion-call deadline in seconds.
    pub completion_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: env_or("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: env_or("RUST_LOG", "info"),
            data_dir: env_or("DATA_DIR", "data"),
            ephemeral_store: env_or("EPHEMERAL_STORE", "false")
                .parse::<bool>()
                .context("EPHEMERAL_STORE must be true or false")?,
            max_picks: env_or("MAX_PICKS", "3")
                .parse::<usize>()
                .context("MAX_PICKS must be a positive integer")?,
            max_concurrency: env_or("MAX_CONCURRENCY", "4")
                .parse::<usize>()
                .context("MAX_CONCURRENCY must be a positive integer")?,
            completion_timeout_secs: env_or("COMPLETION_TIMEOUT_SECS", "120")
                .parse::<u64>()
                .context("COMPLETION_TIMEOUT_SECS must be a number of seconds")?,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_picks: self.max_picks,
            max_concurrency: self.max_concurrency,
            completion_timeout: Duration::from_secs(self.completion_timeout_secs),
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
