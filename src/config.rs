//! Configuration and credentials for the GDAX clients and the book engine.
//!
//! This module provides the [`Config`] struct for endpoints, optional API
//! credentials and the tuning knobs of the synchronization engine, plus the
//! [`RetryPolicy`] shared by snapshot fetches and feed reconnects.

use std::fmt;
use std::time::Duration;

use rand::Rng;

/// API environment (production or sandbox)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production environment (real money)
    #[default]
    Production,
    /// Public sandbox
    Sandbox,
}

impl Environment {
    /// Get the base URL for REST API
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://api.gdax.com",
            Environment::Sandbox => "https://api-public.sandbox.gdax.com",
        }
    }

    /// Get the WebSocket URL
    pub fn websocket_url(&self) -> &'static str {
        match self {
            Environment::Production => "wss://ws-feed.gdax.com",
            Environment::Sandbox => "wss://ws-feed-public.sandbox.gdax.com",
        }
    }
}

/// API key material used to sign REST requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// API key
    pub key: String,
    /// Base64 encoded API secret
    pub secret: String,
    /// Passphrase chosen when the key was created
    pub passphrase: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(
        key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Backoff policy for retried operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = infinite)
    pub max_retries: u32,
    /// Initial delay between attempts
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as random jitter (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 250,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retries (0 = infinite)
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay in milliseconds
    #[must_use]
    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set maximum delay in milliseconds
    #[must_use]
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter fraction, clamped to `0.0..=1.0`
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Whether another attempt is allowed after `attempt` retries
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_retries == 0 || attempt < self.max_retries
    }

    /// Calculate delay for a given retry attempt, without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }

    /// Delay for a given retry attempt with random jitter added
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = base.as_millis() as f64 * self.jitter;
        let extra = rand::thread_rng().gen_range(0.0..=spread);
        base + Duration::from_millis(extra as u64)
    }
}

/// Configuration for the GDAX clients and the book synchronization engine
///
/// # Example
///
/// ```rust
/// use gdax_book::Config;
/// use gdax_book::config::{Credentials, Environment, RetryPolicy};
///
/// let config = Config::new()
///     .with_environment(Environment::Sandbox)
///     .with_timeout(std::time::Duration::from_secs(30))
///     .with_retry_policy(RetryPolicy::new().max_retries(5));
///
/// // Signed snapshot requests
/// let signed = Config::new().with_credentials(Credentials::new("key", "c2VjcmV0", "pass"));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// API environment
    environment: Environment,

    /// REST base URL override
    rest_url: Option<String>,

    /// WebSocket URL override
    websocket_url: Option<String>,

    /// API credentials for signed requests
    credentials: Option<Credentials>,

    /// HTTP request timeout
    timeout: Duration,

    /// Backoff for snapshot fetches and feed reconnects
    retry_policy: RetryPolicy,

    /// Cap on diffs buffered per product before sync
    max_pending: usize,

    /// Capacity of the sync event broadcast channel
    event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Create a configuration for the production environment
    pub fn new() -> Self {
        Self {
            environment: Environment::default(),
            rest_url: None,
            websocket_url: None,
            credentials: None,
            timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
            max_pending: 100_000,
            event_capacity: 4096,
        }
    }

    /// Set the API environment (production or sandbox)
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Override the REST base URL (e.g. a local mock server)
    #[must_use]
    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = Some(url.into());
        self
    }

    /// Override the WebSocket URL
    #[must_use]
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }

    /// Sign REST requests with these credentials
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the HTTP request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the per-product pre-sync buffer cap (minimum 1)
    #[must_use]
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// Set the sync event channel capacity (minimum 1)
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Get the environment
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Get the REST API base URL
    pub fn rest_base_url(&self) -> &str {
        self.rest_url
            .as_deref()
            .unwrap_or_else(|| self.environment.rest_base_url())
    }

    /// Get the WebSocket URL
    pub fn websocket_url(&self) -> &str {
        self.websocket_url
            .as_deref()
            .unwrap_or_else(|| self.environment.websocket_url())
    }

    /// Get the credentials, if any
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Get the pre-sync buffer cap
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Get the sync event channel capacity
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }
}
