//! Client configuration parsed from environment variables.

use std::time::Duration;

use crate::net::backoff::{
    DEFAULT_CONNECT_RETRIES, DEFAULT_RECONNECT_BASE_MS, DEFAULT_RECONNECT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_MS,
    DEFAULT_RETRY_MAX_MS,
};
use crate::net::{ReconnectPolicy, RetryPolicy};
use crate::services::dedup::DEFAULT_DEDUP_CAPACITY;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_UPLOAD_ENDPOINT: &str = "upload";
pub const DEFAULT_CHAT_ENDPOINT: &str = "chat";
pub const DEFAULT_SAFETY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DISCONNECT_GRACE_MS: u64 = 1_000;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported API URL `{0}` (expected http, https, ws or wss)")]
    InvalidApiUrl(String),
    #[error("invalid value for {key}: `{value}`")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub upload_endpoint: String,
    pub chat_endpoint: String,
    pub reconnect: ReconnectPolicy,
    pub connect_retry: RetryPolicy,
    /// How long an upload may run before stalled files are force-completed.
    pub safety_timeout: Duration,
    /// Delay between a terminal state and the automatic disconnect.
    pub disconnect_grace: Duration,
    /// Treat the batch as done once the last file in input order is terminal.
    pub last_file_shortcut: bool,
    pub dedup_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            upload_endpoint: DEFAULT_UPLOAD_ENDPOINT.to_owned(),
            chat_endpoint: DEFAULT_CHAT_ENDPOINT.to_owned(),
            reconnect: ReconnectPolicy::default(),
            connect_retry: RetryPolicy::default(),
            safety_timeout: Duration::from_secs(DEFAULT_SAFETY_TIMEOUT_SECS),
            disconnect_grace: Duration::from_millis(DEFAULT_DISCONNECT_GRACE_MS),
            last_file_shortcut: true,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `PAPERDESK_API_URL`: default `http://127.0.0.1:8000`
    /// - `PAPERDESK_UPLOAD_ENDPOINT` / `PAPERDESK_CHAT_ENDPOINT`: default `upload` / `chat`
    /// - `PAPERDESK_RECONNECT_BASE_MS`: default 1000
    /// - `PAPERDESK_RECONNECT_MAX_ATTEMPTS`: default 5
    /// - `PAPERDESK_CONNECT_RETRIES`: default 3
    /// - `PAPERDESK_SAFETY_TIMEOUT_SECS`: default 60
    /// - `PAPERDESK_DISCONNECT_GRACE_MS`: default 1000
    /// - `PAPERDESK_LAST_FILE_SHORTCUT`: default `true`
    /// - `PAPERDESK_DEDUP_CAPACITY`: default 512
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unusable API URL or a malformed number or boolean.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] over an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("PAPERDESK_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        if wire::endpoint_url(&api_url, DEFAULT_UPLOAD_ENDPOINT, "").is_err() {
            return Err(ConfigError::InvalidApiUrl(api_url));
        }

        let reconnect = ReconnectPolicy {
            base_delay: Duration::from_millis(env_parse(&lookup, "PAPERDESK_RECONNECT_BASE_MS", DEFAULT_RECONNECT_BASE_MS)?),
            max_attempts: env_parse(&lookup, "PAPERDESK_RECONNECT_MAX_ATTEMPTS", DEFAULT_RECONNECT_MAX_ATTEMPTS)?,
        };
        let connect_retry = RetryPolicy {
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
            max_retries: env_parse(&lookup, "PAPERDESK_CONNECT_RETRIES", DEFAULT_CONNECT_RETRIES)?,
        };

        Ok(Self {
            api_url,
            upload_endpoint: lookup("PAPERDESK_UPLOAD_ENDPOINT").unwrap_or_else(|| DEFAULT_UPLOAD_ENDPOINT.to_owned()),
            chat_endpoint: lookup("PAPERDESK_CHAT_ENDPOINT").unwrap_or_else(|| DEFAULT_CHAT_ENDPOINT.to_owned()),
            reconnect,
            connect_retry,
            safety_timeout: Duration::from_secs(env_parse(
                &lookup,
                "PAPERDESK_SAFETY_TIMEOUT_SECS",
                DEFAULT_SAFETY_TIMEOUT_SECS,
            )?),
            disconnect_grace: Duration::from_millis(env_parse(
                &lookup,
                "PAPERDESK_DISCONNECT_GRACE_MS",
                DEFAULT_DISCONNECT_GRACE_MS,
            )?),
            last_file_shortcut: env_bool(&lookup, "PAPERDESK_LAST_FILE_SHORTCUT", true)?,
            dedup_capacity: env_parse(&lookup, "PAPERDESK_DEDUP_CAPACITY", DEFAULT_DEDUP_CAPACITY)?,
        })
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}

fn env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value: raw }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
