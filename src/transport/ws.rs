//! WebSocket plumbing shared by the socket and managed adapters

use crate::error::{RealtimeError, Result};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A frame as seen by the adapters
#[derive(Debug)]
pub(crate) enum WsFrame {
    Text(String),
    Error(String),
    Closed(Option<String>),
}

/// One open WebSocket, split into reader and writer halves
pub(crate) struct WsConnection {
    reader: SplitStream<WsStream>,
    writer: SplitSink<WsStream, Message>,
    failed: bool,
}

impl WsConnection {
    pub(crate) async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        debug!("Connecting to {}", url);

        let (stream, _) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| RealtimeError::Timeout)?
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;

        let (writer, reader) = stream.split();
        Ok(Self {
            reader,
            writer,
            failed: false,
        })
    }

    pub(crate) async fn send_text(&mut self, text: String) -> Result<()> {
        trace!(frame = %text, "Sending frame");
        self.writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))
    }

    pub(crate) async fn send_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    /// Next text frame or terminal condition. Cancel safe.
    pub(crate) async fn next_frame(&mut self) -> WsFrame {
        if self.failed {
            return WsFrame::Closed(None);
        }

        loop {
            match self.reader.next().await {
                Some(Ok(Message::Text(text))) => return WsFrame::Text(text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return WsFrame::Text(text),
                    Err(_) => debug!(len = bytes.len(), "Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    self.failed = true;
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()).trim().to_string());
                    return WsFrame::Closed(reason);
                }
                // Pings are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.failed = true;
                    return WsFrame::Error(e.to_string());
                }
                None => {
                    self.failed = true;
                    return WsFrame::Closed(None);
                }
            }
        }
    }

    /// Send a close frame (best effort) and drop the socket
    pub(crate) async fn close(mut self) {
        if !self.failed {
            let _ = timeout(CLOSE_TIMEOUT, self.writer.send(Message::Close(None))).await;
        }
        let _ = timeout(CLOSE_TIMEOUT, self.writer.close()).await;
    }
}
