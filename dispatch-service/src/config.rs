//! Configuration module for environment variable parsing.
//!
//! All configuration comes from environment variables with sensible defaults,
//! so the service starts locally with nothing set.

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::dispatch::{DispatchSettings, RetryPolicy};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Web Server Configuration
    // =========================================================================

    /// Port for the web server to listen on
    pub port: u16,

    /// Public base URL of this service
    pub service_base_url: String,

    /// Accepted values of the `x-api-key` header
    pub api_keys: Vec<String>,

    /// Serve write endpoints without an API key when none is configured.
    /// Meant for local development only.
    pub allow_unauthenticated: bool,

    // =========================================================================
    // Provider Configuration
    // =========================================================================

    /// Base URL of the Postmark-compatible mail API
    pub provider_base_url: String,

    /// Server token for the mail API
    pub provider_server_token: Option<String>,

    /// Sender address used for every message
    pub sender_address: String,

    /// Provider message stream
    pub message_stream: String,

    // =========================================================================
    // Dispatch Configuration
    // =========================================================================

    /// Maximum number of simultaneous provider calls
    pub max_in_flight: usize,

    /// Maximum recipients accepted in one batch
    pub max_batch_size: usize,

    /// Timeout for a single provider call in milliseconds
    pub provider_timeout_ms: u64,

    /// Retries after the first attempt for transient provider failures
    pub retry_bound: u32,

    /// Backoff range in milliseconds (first delay, cap)
    pub retry_backoff_ms: (u64, u64),

    /// Overall deadline for one dispatch call in milliseconds
    pub batch_deadline_ms: u64,

    /// Grace period for in-flight sends after the deadline in milliseconds
    pub deadline_grace_ms: u64,

    /// Base URL for generated invite and dashboard links
    pub invite_base_url: String,

    /// Days until a defaulted invite expires
    pub invite_expiry_days: u64,

    /// How long idempotency keys are remembered, in seconds
    pub idempotency_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            service_base_url: "http://localhost:8080".to_string(),
            api_keys: Vec::new(),
            allow_unauthenticated: false,
            provider_base_url: "https://api.postmarkapp.com".to_string(),
            provider_server_token: None,
            sender_address: "noreply@localhost".to_string(),
            message_stream: "outbound".to_string(),
            max_in_flight: 5,
            max_batch_size: 100,
            provider_timeout_ms: 10_000,
            retry_bound: 2,
            retry_backoff_ms: (200, 5000),
            batch_deadline_ms: 60_000,
            deadline_grace_ms: 5000,
            invite_base_url: "http://localhost:8080".to_string(),
            invite_expiry_days: 30,
            idempotency_ttl_secs: 600,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let service_base_url = env::var("SERVICE_BASE_URL")
            .unwrap_or(defaults.service_base_url);

        Config {
            port: parse_or("PORT", defaults.port),

            // Links point back at this service unless a frontend is configured
            invite_base_url: env::var("INVITE_BASE_URL")
                .unwrap_or_else(|_| service_base_url.clone()),

            service_base_url,

            api_keys: parse_csv("API_KEY").unwrap_or(defaults.api_keys),

            allow_unauthenticated: parse_or("ALLOW_UNAUTHENTICATED", defaults.allow_unauthenticated),

            provider_base_url: env::var("PROVIDER_BASE_URL")
                .unwrap_or(defaults.provider_base_url),

            provider_server_token: env::var("PROVIDER_SERVER_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),

            sender_address: env::var("SENDER_ADDRESS")
                .unwrap_or(defaults.sender_address),

            message_stream: env::var("MESSAGE_STREAM")
                .unwrap_or(defaults.message_stream),

            max_in_flight: parse_or("MAX_IN_FLIGHT", defaults.max_in_flight),

            max_batch_size: parse_or("MAX_BATCH_SIZE", defaults.max_batch_size),

            provider_timeout_ms: parse_or("PROVIDER_TIMEOUT_MS", defaults.provider_timeout_ms),

            retry_bound: parse_or("RETRY_BOUND", defaults.retry_bound),

            retry_backoff_ms: parse_range("RETRY_BACKOFF_RANGE_MS", defaults.retry_backoff_ms),

            batch_deadline_ms: parse_or("BATCH_DEADLINE_MS", defaults.batch_deadline_ms),

            deadline_grace_ms: parse_or("DEADLINE_GRACE_MS", defaults.deadline_grace_ms),

            invite_expiry_days: parse_or("INVITE_EXPIRY_DAYS", defaults.invite_expiry_days),

            idempotency_ttl_secs: parse_or("IDEMPOTENCY_TTL_SECS", defaults.idempotency_ttl_secs),
        }
    }

    /// Engine settings derived from this configuration.
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_in_flight: self.max_in_flight.max(1),
            max_batch_size: self.max_batch_size,
            provider_timeout: Duration::from_millis(self.provider_timeout_ms),
            retry: RetryPolicy {
                max_retries: self.retry_bound,
                backoff_ms: self.retry_backoff_ms.0,
                backoff_factor: 2,
                max_backoff_ms: self.retry_backoff_ms.1,
            },
            batch_deadline: Duration::from_millis(self.batch_deadline_ms),
            deadline_grace: Duration::from_millis(self.deadline_grace_ms),
            invite_base_url: self.invite_base_url.clone(),
            invite_expiry_days: self.invite_expiry_days,
            idempotency_ttl: Duration::from_secs(self.idempotency_ttl_secs),
        }
    }
}

/// Parse a variable, falling back to `default` when unset or unparsable.
fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(env_var = name, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a comma-separated range like "200,5000" into a tuple.
fn parse_range(name: &str, default: (u64, u64)) -> (u64, u64) {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 2 {
        warn!(env_var = name, value = %raw, "Invalid range format, using default");
        return default;
    }

    let min = parts[0].trim().parse::<u64>();
    let max = parts[1].trim().parse::<u64>();

    match (min, max) {
        (Ok(min), Ok(max)) if min <= max => (min, max),
        _ => {
            warn!(env_var = name, value = %raw, "Invalid range values, using default");
            default
        }
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
