//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in `SecretString` to keep
//! credentials out of logs.

pub mod secrets;

use crate::engine::RetryPolicy;
use crate::error::{Error, Result};
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub http_bind: String,
    pub queue_name: String,
    pub worker_concurrency: usize,
    pub retry: RetryPolicy,
    pub visibility_timeout: Duration,
    /// How long a submission may sit in processing before the reaper
    /// returns it to pending.
    pub processing_timeout: Duration,
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = RetryPolicy::default();
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            http_bind: std::env::var("HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            queue_name: std::env::var("QUEUE_NAME")
                .unwrap_or_else(|_| "ticket_submissions".to_string()),
            worker_concurrency: parsed_var("WORKER_CONCURRENCY", 4)?,
            retry: RetryPolicy {
                max_retries: parsed_var("MAX_RETRIES", defaults.max_retries)?,
                base_delay: Duration::from_secs(parsed_var(
                    "RETRY_BASE_DELAY_SECS",
                    defaults.base_delay.as_secs(),
                )?),
                max_delay: Duration::from_secs(parsed_var(
                    "RETRY_MAX_DELAY_SECS",
                    defaults.max_delay.as_secs(),
                )?),
            },
            visibility_timeout: Duration::from_secs(parsed_var("VISIBILITY_TIMEOUT_SECS", 30)?),
            processing_timeout: Duration::from_secs(parsed_var("PROCESSING_TIMEOUT_SECS", 300)?),
            poll_interval: Duration::from_millis(parsed_var("POLL_INTERVAL_MS", 1000)?),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}
