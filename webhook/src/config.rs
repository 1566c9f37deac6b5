use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Webhook shared secret cannot be empty")]
    EmptySecret,

    #[error("Rate limit window cannot be 0 seconds")]
    InvalidRateWindow,

    #[error("Rate limit budget cannot be 0 requests")]
    InvalidRateBudget,

    #[error("Max reprocess passes cannot be 0")]
    InvalidPassBound,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    pub directory: DirectoryConfig,
    pub webhook: WebhookConfig,
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// Connection parameters for the backing entity store.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DirectoryConfig {
    /// Base URL of the entity store API.
    ///
    /// Note: Uses the `url::Url` type so invalid URLs are rejected
    /// during config deserialization.
    pub base_url: Url,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WebhookConfig {
    /// Shared secret for authenticating inbound notifications.
    pub shared_secret: String,
    /// Requests allowed per rate window, identity-agnostic.
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,
    /// Rate window length in seconds.
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    /// Pause before a reprocessing pass, letting a burst of edits
    /// finish before recomputation.
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,
    /// Upper bound on reconciliation passes per notification.
    #[serde(default = "default_max_reprocess_passes")]
    pub max_reprocess_passes: u32,
}

fn default_rate_limit_requests() -> u32 {
    100
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_settle_interval_ms() -> u64 {
    2000
}

fn default_max_reprocess_passes() -> u32 {
    5
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.listener.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.webhook.shared_secret.is_empty() {
            return Err(ValidationError::EmptySecret);
        }
        if self.webhook.rate_limit_window_secs == 0 {
            return Err(ValidationError::InvalidRateWindow);
        }
        if self.webhook.rate_limit_requests == 0 {
            return Err(ValidationError::InvalidRateBudget);
        }
        if self.webhook.max_reprocess_passes == 0 {
            return Err(ValidationError::InvalidPassBound);
        }
        Ok(())
    }
}
