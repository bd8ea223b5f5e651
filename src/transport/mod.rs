//! Transport boundary for the realtime connection.
//!
//! An adapter owns one physical connection and normalizes whatever the wire
//! format is into [`InboundMessage`]s. The controller owns the adapter
//! exclusively, so adapters never need internal locking.

use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, Result};
use crate::messages::InboundMessage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod managed;
pub mod socket;
mod ws;

pub use managed::ManagedTransport;
pub use socket::SocketTransport;

/// Which kind of backend a transport talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Raw bidirectional socket carrying `{channel, type, payload}` frames
    Socket,
    /// Managed pub/sub service (Pusher protocol)
    Managed,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Socket => write!(f, "socket"),
            TransportKind::Managed => write!(f, "managed"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socket" | "websocket" | "ws" => Ok(TransportKind::Socket),
            "managed" | "pusher" => Ok(TransportKind::Managed),
            other => Err(RealtimeError::Config(format!(
                "unknown transport '{}': must be socket or managed",
                other
            ))),
        }
    }
}

/// Session details assigned by the server when the connection opens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub socket_id: Option<String>,
    /// Idle time after which the client should probe the connection
    pub activity_timeout: Option<Duration>,
}

/// What the connection reports after it is open
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A normalized application message
    Message(InboundMessage),
    /// A network or server error; a `Closed` follows when the socket is gone
    Error(String),
    /// The connection is gone, with the close reason if one was given
    Closed(Option<String>),
}

#[async_trait]
pub trait Transport: Send + 'static {
    fn kind(&self) -> TransportKind;

    /// Endpoint or cluster shown in the status snapshot
    fn descriptor(&self) -> String;

    /// Open the connection. Calling this while open returns the current session
    /// without dialing again.
    async fn open(&mut self) -> Result<SessionInfo>;

    /// Ask the backend to start delivering a channel
    async fn subscribe(&mut self, channel: &str) -> Result<()>;

    /// Ask the backend to stop delivering a channel
    async fn unsubscribe(&mut self, channel: &str) -> Result<()>;

    /// Wait for the next event. Must be cancel safe. Returns `Closed`
    /// immediately when the transport is not open.
    async fn next_event(&mut self) -> TransportEvent;

    /// Release the connection. No further messages are produced afterwards.
    async fn close(&mut self);
}

/// Build the transport named by the configuration
pub fn build(config: &RealtimeConfig) -> Result<Box<dyn Transport>> {
    config.validate()?;

    // A disabled client never opens its transport, so the endpoint may be missing
    let required = |value: &Option<String>, what: &str| match value {
        Some(value) => Ok(value.clone()),
        None if !config.enabled => Ok(String::new()),
        None => Err(RealtimeError::Config(format!("{} transport requires {}", config.transport, what))),
    };

    match config.transport {
        TransportKind::Socket => {
            let url = required(&config.url, "a url")?;
            Ok(Box::new(SocketTransport::new(url, config.connect_timeout)))
        }
        TransportKind::Managed => {
            let app_key = required(&config.app_key, "an app key")?;
            let mut transport =
                ManagedTransport::new(app_key, config.cluster.clone(), config.connect_timeout);
            if let Some(host) = &config.url {
                transport = transport.with_host(host.clone());
            }
            Ok(Box::new(transport))
        }
    }
}
