//! Managed pub/sub adapter speaking the Pusher channels protocol (v7).
//!
//! The service assigns a socket id in `pusher:connection_established` and
//! expects the client to probe with `pusher:ping` after `activity_timeout`
//! seconds of silence.

use super::ws::{WsConnection, WsFrame};
use super::{SessionInfo, Transport, TransportEvent, TransportKind};
use crate::error::{RealtimeError, Result};
use crate::messages::{InboundMessage, WireMessage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

pub const PROTOCOL_VERSION: u8 = 7;

const EVENT_CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
const EVENT_ERROR: &str = "pusher:error";
const EVENT_PING: &str = "pusher:ping";
const EVENT_PONG: &str = "pusher:pong";
const EVENT_SUBSCRIBE: &str = "pusher:subscribe";
const EVENT_UNSUBSCRIBE: &str = "pusher:unsubscribe";
const EVENT_SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
const EVENT_SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";

const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope of every frame on the managed service
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ManagedEnvelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedFrame {
    Established(SessionInfo),
    Ping,
    Pong,
    Error {
        code: Option<u16>,
        message: String,
    },
    SubscriptionSucceeded(String),
    SubscriptionError {
        channel: String,
        message: String,
    },
    Message(InboundMessage),
}

/// The service double-encodes `data` as a JSON string; decode it when possible
fn decode_data(data: Value) -> Value {
    match data {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

/// Classify an inbound text frame
pub fn parse_managed_frame(text: &str) -> Result<ManagedFrame> {
    let envelope: ManagedEnvelope = serde_json::from_str(text)
        .map_err(|e| RealtimeError::Protocol(format!("malformed envelope: {}", e)))?;
    let data = decode_data(envelope.data);

    let frame = match envelope.event.as_str() {
        EVENT_CONNECTION_ESTABLISHED => {
            let socket_id = data
                .get("socket_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            if socket_id.is_none() {
                return Err(RealtimeError::Protocol(
                    "connection_established without socket_id".into(),
                ));
            }
            let activity_timeout = data
                .get("activity_timeout")
                .and_then(Value::as_u64)
                .map(Duration::from_secs);
            ManagedFrame::Established(SessionInfo {
                socket_id,
                activity_timeout,
            })
        }
        EVENT_PING => ManagedFrame::Ping,
        EVENT_PONG => ManagedFrame::Pong,
        EVENT_ERROR => ManagedFrame::Error {
            code: data
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok()),
            message: data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        },
        EVENT_SUBSCRIPTION_SUCCEEDED => {
            ManagedFrame::SubscriptionSucceeded(envelope.channel.unwrap_or_default())
        }
        EVENT_SUBSCRIPTION_ERROR => ManagedFrame::SubscriptionError {
            channel: envelope.channel.unwrap_or_default(),
            message: data
                .get("error")
                .or_else(|| data.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("subscription rejected")
                .to_string(),
        },
        _ => {
            let channel = envelope
                .channel
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    RealtimeError::Protocol(format!("event '{}' has no channel", envelope.event))
                })?;
            ManagedFrame::Message(
                WireMessage {
                    channel,
                    event_type: envelope.event,
                    payload: data,
                }
                .into(),
            )
        }
    };

    Ok(frame)
}

/// WebSocket URL for an app on the managed service
pub fn managed_url(app_key: &str, cluster: &str, host: Option<&str>) -> String {
    let query = format!(
        "protocol={}&client=classcast&version={}&flash=false",
        PROTOCOL_VERSION,
        env!("CARGO_PKG_VERSION")
    );
    match host {
        Some(host) => format!("{}/app/{}?{}", host.trim_end_matches('/'), app_key, query),
        None => format!("wss://ws-{}.pusher.com:443/app/{}?{}", cluster, app_key, query),
    }
}

fn command(event: &str, data: Value) -> ManagedEnvelope {
    ManagedEnvelope {
        event: event.to_string(),
        channel: None,
        data,
    }
}

pub struct ManagedTransport {
    app_key: String,
    cluster: String,
    host: Option<String>,
    connect_timeout: Duration,
    conn: Option<WsConnection>,
    session: SessionInfo,
    // Deadline of the outstanding pusher:ping, if one was sent
    ping_deadline: Option<Instant>,
}

impl ManagedTransport {
    pub fn new(
        app_key: impl Into<String>,
        cluster: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            app_key: app_key.into(),
            cluster: cluster.into(),
            host: None,
            connect_timeout,
            conn: None,
            session: SessionInfo::default(),
            ping_deadline: None,
        }
    }

    /// Connect to a self-hosted, protocol-compatible server instead of the cluster
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn url(&self) -> String {
        managed_url(&self.app_key, &self.cluster, self.host.as_deref())
    }

    async fn send(&mut self, envelope: ManagedEnvelope) -> Result<()> {
        let conn = self.conn.as_mut().ok_or(RealtimeError::NotConnected)?;
        conn.send_json(&envelope).await
    }

    async fn await_established(conn: &mut WsConnection) -> Result<SessionInfo> {
        loop {
            match conn.next_frame().await {
                WsFrame::Text(text) => match parse_managed_frame(&text) {
                    Ok(ManagedFrame::Established(session)) => return Ok(session),
                    Ok(ManagedFrame::Error { code, message }) => {
                        return Err(RealtimeError::Connection(match code {
                            Some(code) => format!("{} ({})", message, code),
                            None => message,
                        }));
                    }
                    Ok(other) => trace!(frame = ?other, "Ignoring frame before handshake"),
                    Err(e) => debug!("Dropping frame before handshake: {}", e),
                },
                WsFrame::Error(e) => return Err(RealtimeError::Transport(e)),
                WsFrame::Closed(reason) => {
                    return Err(RealtimeError::Connection(format!(
                        "closed during handshake: {}",
                        reason.unwrap_or_else(|| "no reason".into())
                    )))
                }
            }
        }
    }

    fn idle_limit(&self) -> Duration {
        self.session
            .activity_timeout
            .unwrap_or(DEFAULT_ACTIVITY_TIMEOUT)
    }
}

#[async_trait]
impl Transport for ManagedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Managed
    }

    fn descriptor(&self) -> String {
        match &self.host {
            Some(host) => host.clone(),
            None => self.cluster.clone(),
        }
    }

    async fn open(&mut self) -> Result<SessionInfo> {
        if self.conn.is_some() {
            return Ok(self.session.clone());
        }

        let mut conn = WsConnection::connect(&self.url(), self.connect_timeout).await?;
        let session = match timeout(self.connect_timeout, Self::await_established(&mut conn)).await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                conn.close().await;
                return Err(e);
            }
            Err(_) => {
                conn.close().await;
                return Err(RealtimeError::Timeout);
            }
        };

        info!(
            cluster = %self.cluster,
            socket_id = ?session.socket_id,
            "Managed connection established"
        );
        self.conn = Some(conn);
        self.session = session.clone();
        self.ping_deadline = None;
        Ok(session)
    }

    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        self.send(command(EVENT_SUBSCRIBE, json!({ "channel": channel })))
            .await
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        self.send(command(EVENT_UNSUBSCRIBE, json!({ "channel": channel })))
            .await
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let wait = match self.ping_deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => self.idle_limit(),
            };

            let Some(conn) = self.conn.as_mut() else {
                return TransportEvent::Closed(None);
            };

            let frame = match timeout(wait, conn.next_frame()).await {
                Ok(frame) => frame,
                Err(_) if self.ping_deadline.is_some() => {
                    warn!(cluster = %self.cluster, "No pong from server, dropping connection");
                    self.close().await;
                    return TransportEvent::Error("activity timeout".into());
                }
                Err(_) => {
                    trace!("Connection idle, sending ping");
                    if let Err(e) = self.send(command(EVENT_PING, json!({}))).await {
                        return TransportEvent::Error(e.to_string());
                    }
                    self.ping_deadline = Some(Instant::now() + PONG_TIMEOUT);
                    continue;
                }
            };

            // Any traffic proves the connection is alive
            self.ping_deadline = None;

            match frame {
                WsFrame::Text(text) => match parse_managed_frame(&text) {
                    Ok(ManagedFrame::Message(msg)) => return TransportEvent::Message(msg),
                    Ok(ManagedFrame::Ping) => {
                        if let Err(e) = self.send(command(EVENT_PONG, json!({}))).await {
                            return TransportEvent::Error(e.to_string());
                        }
                    }
                    Ok(ManagedFrame::Pong) => trace!("Pong received"),
                    Ok(ManagedFrame::Established(session)) => {
                        debug!(socket_id = ?session.socket_id, "Session refreshed");
                        self.session = session;
                    }
                    Ok(ManagedFrame::SubscriptionSucceeded(channel)) => {
                        debug!(channel = %channel, "Subscription succeeded");
                    }
                    Ok(ManagedFrame::SubscriptionError { channel, message }) => {
                        return TransportEvent::Error(format!(
                            "subscription to {} failed: {}",
                            channel, message
                        ));
                    }
                    Ok(ManagedFrame::Error { code, message }) => {
                        warn!(code = ?code, "Service error: {}", message);
                        return TransportEvent::Error(message);
                    }
                    Err(e) => debug!("Dropping managed frame: {}", e),
                },
                WsFrame::Error(e) => {
                    warn!(cluster = %self.cluster, "Managed connection error: {}", e);
                    return TransportEvent::Error(e);
                }
                WsFrame::Closed(reason) => {
                    debug!(cluster = %self.cluster, reason = ?reason, "Managed connection closed");
                    self.conn = None;
                    self.session = SessionInfo::default();
                    return TransportEvent::Closed(reason);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
        self.session = SessionInfo::default();
        self.ping_deadline = None;
    }
}
