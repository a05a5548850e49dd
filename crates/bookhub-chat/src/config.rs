//! Configuration for the messaging client.
//!
//! Configuration is plain data with builder-style setters. It can also be
//! loaded from TOML, where durations are written in milliseconds:
//!
//! ```toml
//! url = "https://chat.bookhub.example"
//! namespace = "/"
//! connect_timeout_ms = 5000
//!
//! [headers]
//! X-Client = "bookhub-web"
//!
//! [reconnect]
//! max_attempts = 5
//! initial_delay_ms = 1000
//! max_delay_ms = 5000
//! backoff_multiplier = 2.0
//!
//! [messaging]
//! echo_policy = "suppress"
//! dedup_window = 256
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ChatError, Result};

/// Engine.IO protocol revision spoken by the transport.
pub const ENGINE_IO_VERSION: &str = "4";

/// Configuration for a [`ChatClient`](crate::ChatClient).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatConfig {
    /// Base URL of the chat backend (`http`, `https`, `ws` or `wss`).
    pub url: String,
    /// Engine.IO endpoint path.
    #[serde(default = "default_path")]
    pub path: String,
    /// Socket.IO namespace to join.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Extra headers sent with the WebSocket handshake.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Upper bound for establishing the connection, handshake included.
    #[serde(
        default = "default_connect_timeout",
        rename = "connect_timeout_ms",
        with = "duration_ms"
    )]
    pub connect_timeout: Duration,
    /// Automatic reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Message routing behavior.
    #[serde(default)]
    pub messaging: MessagingConfig,
}

fn default_path() -> String {
    "/socket.io/".to_string()
}

fn default_namespace() -> String {
    "/".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl ChatConfig {
    /// Create a configuration for the backend at `url` with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: default_path(),
            namespace: default_namespace(),
            headers: HashMap::new(),
            connect_timeout: default_connect_timeout(),
            reconnect: ReconnectConfig::default(),
            messaging: MessagingConfig::default(),
        }
    }

    /// Parse and validate a TOML configuration document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ChatError::io(path, &e))?;
        Self::from_toml_str(&source)
    }

    /// Add a custom header for the WebSocket handshake.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the Engine.IO endpoint path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the Socket.IO namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reconnection policy.
    pub fn reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    /// Disable automatic reconnection.
    pub fn no_reconnect(mut self) -> Self {
        self.reconnect.max_attempts = Some(0);
        self
    }

    /// Set the message routing configuration.
    pub fn messaging_config(mut self, config: MessagingConfig) -> Self {
        self.messaging = config;
        self
    }

    /// Set how the client treats the backend echoing this user's own messages.
    pub fn echo_policy(mut self, policy: EchoPolicy) -> Self {
        self.messaging.echo_policy = policy;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.socket_url(0)?;
        if !self.namespace.starts_with('/') {
            return Err(ChatError::Config(format!(
                "namespace must start with '/': {}",
                self.namespace
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(ChatError::Config("connect_timeout must be positive".into()));
        }
        self.reconnect.validate()?;
        if self.messaging.join_event.is_empty() {
            return Err(ChatError::Config("join_event must not be empty".into()));
        }
        Ok(())
    }

    /// Build the WebSocket URL for a session of `user_id`.
    ///
    /// `http(s)` base URLs are mapped to `ws(s)`. The Engine.IO query
    /// parameters and the `userId` routing metadata are appended to any query
    /// the base URL already carries.
    pub fn socket_url(&self, user_id: i64) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ChatError::InvalidUrl(format!(
                    "unsupported scheme '{other}' in {}",
                    self.url
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| ChatError::InvalidUrl(format!("cannot use scheme {scheme}")))?;

        let mut path = self.path.trim_end_matches('/').to_string();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        path.push('/');
        url.set_path(&path);

        url.query_pairs_mut()
            .append_pair("EIO", ENGINE_IO_VERSION)
            .append_pair("transport", "websocket")
            .append_pair("userId", &user_id.to_string());
        Ok(url)
    }
}

/// Configuration for automatic reconnection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts. `None` means infinite retries,
    /// `Some(0)` disables reconnection.
    pub max_attempts: Option<u32>,
    /// Delay before the first reconnection attempt.
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Symmetric random jitter as a fraction of the delay (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of reconnection attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Retry forever.
    pub fn unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set the initial delay between reconnection attempts.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between reconnection attempts.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier for exponential backoff.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter fraction.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check that the policy is usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.backoff_multiplier >= 1.0) {
            return Err(ChatError::Config(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ChatError::Config(format!(
                "jitter must be within 0.0..=1.0, got {}",
                self.jitter
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(ChatError::Config(
                "initial_delay must not exceed max_delay".into(),
            ));
        }
        Ok(())
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_attempt(&self, attempts_made: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts_made < max)
    }

    /// Calculate the delay before reconnection attempt `attempt` (1-based).
    ///
    /// Attempt 1 waits `initial_delay`; every further attempt multiplies the
    /// delay by `backoff_multiplier` until it reaches `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_ms = self.max_delay.as_millis() as f64;
        let base_ms = self.initial_delay.as_millis() as f64;
        let mut delay_ms = (base_ms * self.backoff_multiplier.powi(exponent)).min(max_ms);

        if self.jitter > 0.0 {
            let spread = 2.0 * rand::random::<f64>() - 1.0;
            delay_ms = (delay_ms * (1.0 + self.jitter * spread)).clamp(0.0, max_ms);
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// What to do with a received message whose sender is the session's own user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoPolicy {
    /// Drop it: the backend is echoing the message this client just sent.
    #[default]
    Suppress,
    /// Dispatch it: another device of the same user sent it.
    Deliver,
}

/// Message routing behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessagingConfig {
    /// Handling of received messages sent by the session's own user.
    pub echo_policy: EchoPolicy,
    /// Number of recent message ids remembered per stream for duplicate
    /// suppression. `0` disables duplicate suppression.
    pub dedup_window: usize,
    /// Name of the control event announcing the user after connecting.
    pub join_event: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            echo_policy: EchoPolicy::Suppress,
            dedup_window: 256,
            join_event: "join".to_string(),
        }
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
