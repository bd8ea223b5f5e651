//! Configuration for the realtime core

use crate::error::{RealtimeError, Result};
use crate::transport::TransportKind;
use std::time::Duration;

/// Default cluster for the managed pub/sub service
pub const DEFAULT_CLUSTER: &str = "mt1";

/// Channel reported by the status snapshot unless configured otherwise
pub const DEFAULT_PRIMARY_CHANNEL: &str = "public";

/// Configuration passed to the core at construction time
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// When false, `connect()` is a no-op and nothing is ever dispatched
    pub enabled: bool,

    /// Which transport adapter to build
    pub transport: TransportKind,

    /// Socket endpoint (e.g. "ws://localhost:6001/realtime"), or a host
    /// override for the managed service
    pub url: Option<String>,

    /// Application key for the managed service
    pub app_key: Option<String>,

    /// Cluster of the managed service (e.g. "mt1", "eu")
    pub cluster: String,

    /// Channel reported by the status snapshot
    pub primary_channel: Option<String>,

    /// Whether to automatically reconnect on disconnect
    pub auto_reconnect: bool,

    /// Initial delay before reconnecting
    pub reconnect_delay: Duration,

    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,

    /// Multiplier applied to the delay after each failed attempt
    pub backoff_factor: f64,

    /// Consecutive failed attempts before giving up (None retries forever)
    pub max_reconnect_attempts: Option<u32>,

    /// Timeout for opening the connection
    pub connect_timeout: Duration,

    /// Interval used by the status poller
    pub status_poll_interval: Duration,
}

impl RealtimeConfig {
    fn base(transport: TransportKind) -> Self {
        Self {
            enabled: true,
            transport,
            url: None,
            app_key: None,
            cluster: DEFAULT_CLUSTER.to_string(),
            primary_channel: Some(DEFAULT_PRIMARY_CHANNEL.to_string()),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_reconnect_attempts: Some(10),
            connect_timeout: Duration::from_secs(10),
            status_poll_interval: Duration::from_secs(15),
        }
    }

    /// Configuration for a raw socket endpoint
    pub fn socket(url: impl Into<String>) -> Self {
        let mut config = Self::base(TransportKind::Socket);
        config.url = Some(url.into());
        config
    }

    /// Configuration for the managed pub/sub service
    pub fn managed(app_key: impl Into<String>, cluster: impl Into<String>) -> Self {
        let mut config = Self::base(TransportKind::Managed);
        config.app_key = Some(app_key.into());
        config.cluster = cluster.into();
        config
    }

    /// Load configuration from `CLASSCAST_*` environment variables.
    ///
    /// Not validated here; callers may still override fields before building
    /// a transport.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let transport = match lookup("CLASSCAST_TRANSPORT") {
            Some(kind) => kind.parse()?,
            None => TransportKind::Socket,
        };

        let mut config = Self::base(transport);
        config.url = lookup("CLASSCAST_URL");
        config.app_key = lookup("CLASSCAST_APP_KEY");

        if let Some(cluster) = lookup("CLASSCAST_CLUSTER") {
            config.cluster = cluster;
        }
        if let Some(channel) = lookup("CLASSCAST_CHANNEL") {
            config.primary_channel = Some(channel);
        }
        if let Some(enabled) = lookup("CLASSCAST_ENABLED") {
            config.enabled = parse_flag(&enabled).ok_or_else(|| {
                RealtimeError::Config(format!("CLASSCAST_ENABLED must be a boolean, got '{}'", enabled))
            })?;
        }
        if let Some(attempts) = lookup("CLASSCAST_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = match attempts.parse::<u32>() {
                Ok(0) => None,
                Ok(n) => Some(n),
                Err(_) => {
                    return Err(RealtimeError::Config(format!(
                        "CLASSCAST_MAX_RECONNECT_ATTEMPTS must be a number, got '{}'",
                        attempts
                    )))
                }
            };
        }

        if let Some(secs) = lookup("CLASSCAST_STATUS_INTERVAL") {
            let secs = secs.parse::<u64>().map_err(|_| {
                RealtimeError::Config(format!(
                    "CLASSCAST_STATUS_INTERVAL must be a number of seconds, got '{}'",
                    secs
                ))
            })?;
            config.status_poll_interval = Duration::from_secs(secs.max(1));
        }

        Ok(config)
    }

    /// Check that the transport has what it needs to open a connection
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        match self.transport {
            TransportKind::Socket if self.url.is_none() => Err(RealtimeError::Config(
                "socket transport requires a url".into(),
            )),
            TransportKind::Managed if self.app_key.is_none() => Err(RealtimeError::Config(
                "managed transport requires an app key".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Disable realtime features entirely
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Disable automatic reconnection
    pub fn no_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Set the reconnection delay range
    pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    /// Set the backoff multiplier
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Limit consecutive reconnect attempts (None retries forever)
    pub fn max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the host used by the managed transport
    pub fn host(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the channel reported by the status snapshot
    pub fn primary_channel(mut self, channel: impl Into<String>) -> Self {
        self.primary_channel = Some(channel.into());
        self
    }

    /// Set the status poll interval
    pub fn status_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll_interval = interval;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_socket_defaults() {
        let config = RealtimeConfig::socket("ws://localhost:6001/realtime");

        assert!(config.enabled);
        assert_eq!(config.transport, TransportKind::Socket);
        assert_eq!(config.url.as_deref(), Some("ws://localhost:6001/realtime"));
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, Some(10));
        assert_eq!(config.status_poll_interval, Duration::from_secs(15));
        assert_eq!(config.primary_channel.as_deref(), Some("public"));
    }

    #[test]
    fn test_config_managed() {
        let config = RealtimeConfig::managed("app-key", "eu");

        assert_eq!(config.transport, TransportKind::Managed);
        assert_eq!(config.app_key.as_deref(), Some("app-key"));
        assert_eq!(config.cluster, "eu");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_chain() {
        let config = RealtimeConfig::socket("ws://localhost:6001")
            .no_reconnect()
            .reconnect_delay(Duration::from_millis(50), Duration::from_secs(2))
            .max_reconnect_attempts(None)
            .primary_channel("leaderboard");

        assert!(!config.auto_reconnect);
        assert_eq!(config.reconnect_delay, Duration::from_millis(50));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.max_reconnect_attempts, None);
        assert_eq!(config.primary_channel.as_deref(), Some("leaderboard"));
    }

    #[test]
    fn test_config_from_lookup() {
        let config = RealtimeConfig::from_lookup(lookup_from(&[
            ("CLASSCAST_TRANSPORT", "managed"),
            ("CLASSCAST_APP_KEY", "key-1"),
            ("CLASSCAST_CLUSTER", "ap2"),
            ("CLASSCAST_MAX_RECONNECT_ATTEMPTS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.transport, TransportKind::Managed);
        assert_eq!(config.app_key.as_deref(), Some("key-1"));
        assert_eq!(config.cluster, "ap2");
        assert_eq!(config.max_reconnect_attempts, None);
    }

    #[test]
    fn test_config_disabled_skips_validation() {
        let config =
            RealtimeConfig::from_lookup(lookup_from(&[("CLASSCAST_ENABLED", "false")])).unwrap();

        assert!(!config.enabled);
        assert!(config.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_status_interval() {
        let config = RealtimeConfig::from_lookup(lookup_from(&[("CLASSCAST_STATUS_INTERVAL", "5")]))
            .unwrap();
        assert_eq!(config.status_poll_interval, Duration::from_secs(5));

        let err = RealtimeConfig::from_lookup(lookup_from(&[("CLASSCAST_STATUS_INTERVAL", "soon")]))
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Config(_)));
    }

    #[test]
    fn test_config_from_lookup_rejects_bad_values() {
        let err = RealtimeConfig::from_lookup(lookup_from(&[("CLASSCAST_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Config(_)));

        let err = RealtimeConfig::from_lookup(lookup_from(&[("CLASSCAST_TRANSPORT", "carrier-pigeon")]))
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Config(_)));
    }

    #[test]
    fn test_config_validate_missing_endpoint() {
        let config = RealtimeConfig::from_lookup(lookup_from(&[])).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requires a url"));

        let config = RealtimeConfig::from_lookup(lookup_from(&[("CLASSCAST_TRANSPORT", "pusher")]))
            .unwrap();
        assert!(config.validate().unwrap_err().to_string().contains("app key"));
    }
}
