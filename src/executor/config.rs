//! Executor configuration.

use std::time::Duration;

use serde::Deserialize;

/// Tunables for an [`Executor`](super::Executor).
///
/// Deserializable from JSON (or any serde format); missing fields take their
/// defaults.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use onionpipe::executor::ExecutorConfig;
///
/// let config = ExecutorConfig::from_json(r#"{ "request_timeout_ms": 2500 }"#).unwrap();
/// assert_eq!(config.request_timeout(), Some(Duration::from_millis(2500)));
/// assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
/// assert!(!config.expose_error_details);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// How long [`shutdown`](super::Executor::shutdown) waits for in-flight
    /// requests before cancelling them.
    pub shutdown_grace_ms: u64,

    /// Upper bound on one execution; `None` waits indefinitely.
    pub request_timeout_ms: Option<u64>,

    /// Put error messages into the bodies of last-resort `500` responses.
    pub expose_error_details: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 30_000,
            request_timeout_ms: None,
            expose_error_details: false,
        }
    }
}

impl ExecutorConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Any `serde_json` error, including unknown fields.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_error_details(mut self, expose: bool) -> Self {
        self.expose_error_details = expose;
        self
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}
