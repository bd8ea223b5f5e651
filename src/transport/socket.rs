//! Raw socket adapter
//!
//! Inbound text frames are `{"channel": .., "type": .., "payload": ..}`.
//! Subscriptions are requested with `{"action": "subscribe", "channel": ..}`.

use super::ws::{WsConnection, WsFrame};
use super::{SessionInfo, Transport, TransportEvent, TransportKind};
use crate::error::{RealtimeError, Result};
use crate::messages::{InboundMessage, WireMessage};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Control frames sent to the socket server
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SocketCommand {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

/// Normalize an inbound socket frame
pub fn parse_socket_frame(text: &str) -> Result<InboundMessage> {
    let wire = WireMessage::parse(text)?;
    if wire.channel.is_empty() {
        return Err(RealtimeError::Protocol("frame has no channel".into()));
    }
    Ok(wire.into())
}

pub struct SocketTransport {
    url: String,
    connect_timeout: Duration,
    conn: Option<WsConnection>,
}

impl SocketTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            conn: None,
        }
    }

    async fn send(&mut self, command: SocketCommand) -> Result<()> {
        let conn = self.conn.as_mut().ok_or(RealtimeError::NotConnected)?;
        conn.send_json(&command).await
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn descriptor(&self) -> String {
        self.url.clone()
    }

    async fn open(&mut self) -> Result<SessionInfo> {
        if self.conn.is_none() {
            let conn = WsConnection::connect(&self.url, self.connect_timeout).await?;
            info!(url = %self.url, "Socket opened");
            self.conn = Some(conn);
        }

        // The raw socket has no server-assigned session id
        Ok(SessionInfo::default())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        self.send(SocketCommand::Subscribe {
            channel: channel.to_string(),
        })
        .await
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        self.send(SocketCommand::Unsubscribe {
            channel: channel.to_string(),
        })
        .await
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let Some(conn) = self.conn.as_mut() else {
                return TransportEvent::Closed(None);
            };

            match conn.next_frame().await {
                WsFrame::Text(text) => match parse_socket_frame(&text) {
                    Ok(msg) => return TransportEvent::Message(msg),
                    Err(e) => debug!("Dropping socket frame: {}", e),
                },
                WsFrame::Error(e) => {
                    warn!(url = %self.url, "Socket error: {}", e);
                    return TransportEvent::Error(e);
                }
                WsFrame::Closed(reason) => {
                    debug!(url = %self.url, reason = ?reason, "Socket closed");
                    self.conn = None;
                    return TransportEvent::Closed(reason);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_socket_command_serialization() {
        let json = serde_json::to_string(&SocketCommand::Subscribe {
            channel: "leaderboard:class-5a".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"action":"subscribe","channel":"leaderboard:class-5a"}"#);

        let json = serde_json::to_string(&SocketCommand::Unsubscribe {
            channel: "public".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"action":"unsubscribe","channel":"public"}"#);
    }

    #[test]
    fn test_parse_socket_frame() {
        let msg = parse_socket_frame(
            r#"{"channel":"public","type":"achievement-unlocked","payload":{"badge":"streak-7"}}"#,
        )
        .unwrap();

        assert_eq!(msg.channel, "public");
        assert_eq!(msg.event_type, "achievement-unlocked");
        assert_eq!(msg.payload, json!({"badge": "streak-7"}));
    }

    #[test]
    fn test_parse_socket_frame_rejects_missing_channel() {
        assert!(matches!(
            parse_socket_frame(r#"{"channel":"","type":"hello"}"#),
            Err(RealtimeError::Protocol(_))
        ));
        assert!(matches!(
            parse_socket_frame(r#"[1,2,3]"#),
            Err(RealtimeError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_transport_reports_closed() {
        let mut transport = SocketTransport::new("ws://127.0.0.1:9", Duration::from_millis(100));

        assert_eq!(transport.next_event().await, TransportEvent::Closed(None));
        assert!(matches!(
            transport.subscribe("public").await,
            Err(RealtimeError::NotConnected)
        ));
        transport.close().await;
    }
}
