//! Test utilities for driving the realtime core without a real socket.
//!
//! [`MockTransport::pair`] returns the transport to hand to the client and a
//! [`MockServer`] handle that tests use to push frames, fail connection
//! attempts, drop the connection, and inspect the subscribe/unsubscribe calls
//! the controller made.

use crate::error::{RealtimeError, Result};
use crate::messages::WireMessage;
use crate::transport::{SessionInfo, Transport, TransportEvent, TransportKind};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// A subscribe/unsubscribe request the controller sent to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Subscribe(String),
    Unsubscribe(String),
}

enum MockEvent {
    Frame(String),
    Error(String),
    Drop(Option<String>),
}

#[derive(Default)]
struct MockState {
    fail_opens: usize,
    open_delay: Option<Duration>,
    opens: usize,
    closes: usize,
    calls: Vec<RemoteCall>,
    remote: BTreeSet<String>,
    is_open: bool,
}

/// In-memory transport controlled by a [`MockServer`]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedReceiver<MockEvent>,
    pending_close: bool,
}

/// Server-side handle for a [`MockTransport`]
#[derive(Clone)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
    tx: mpsc::UnboundedSender<MockEvent>,
}

impl MockTransport {
    pub fn pair() -> (Self, MockServer) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: state.clone(),
                events: rx,
                pending_close: false,
            },
            MockServer { state, tx },
        )
    }

    fn is_open(&self) -> bool {
        self.state.lock().is_open
    }

    fn mark_closed(&mut self) {
        let mut state = self.state.lock();
        state.is_open = false;
        state.remote.clear();
        self.pending_close = false;
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Managed
    }

    fn descriptor(&self) -> String {
        "mock".to_string()
    }

    async fn open(&mut self) -> Result<SessionInfo> {
        let delay = self.state.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.is_open {
            return Ok(SessionInfo {
                socket_id: Some(format!("mock.{}", state.opens)),
                activity_timeout: None,
            });
        }

        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(RealtimeError::Connection("mock server refused connection".into()));
        }

        // Frames queued while the connection was down are lost
        while self.events.try_recv().is_ok() {}

        state.is_open = true;
        state.opens += 1;
        state.remote.clear();
        self.pending_close = false;

        Ok(SessionInfo {
            socket_id: Some(format!("mock.{}", state.opens)),
            activity_timeout: None,
        })
    }

    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.is_open {
            return Err(RealtimeError::NotConnected);
        }
        state.calls.push(RemoteCall::Subscribe(channel.to_string()));
        state.remote.insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.is_open {
            return Err(RealtimeError::NotConnected);
        }
        state.calls.push(RemoteCall::Unsubscribe(channel.to_string()));
        state.remote.remove(channel);
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            if self.pending_close || !self.is_open() {
                self.mark_closed();
                return TransportEvent::Closed(None);
            }

            match self.events.recv().await {
                Some(MockEvent::Frame(text)) => match WireMessage::parse(&text) {
                    Ok(wire) if !wire.channel.is_empty() => {
                        return TransportEvent::Message(wire.into());
                    }
                    Ok(_) => debug!("Mock dropping frame without channel"),
                    Err(e) => debug!("Mock dropping frame: {}", e),
                },
                Some(MockEvent::Error(e)) => {
                    self.pending_close = true;
                    return TransportEvent::Error(e);
                }
                Some(MockEvent::Drop(reason)) => {
                    self.mark_closed();
                    return TransportEvent::Closed(reason);
                }
                None => {
                    self.mark_closed();
                    return TransportEvent::Closed(Some("mock server gone".into()));
                }
            }
        }
    }

    async fn close(&mut self) {
        let was_open = self.is_open();
        self.mark_closed();
        if was_open {
            self.state.lock().closes += 1;
        }
    }
}

impl MockServer {
    /// Push a `{channel, type, payload}` message to the client
    pub fn send_message(&self, channel: &str, event_type: &str, payload: serde_json::Value) {
        let frame = serde_json::json!({
            "channel": channel,
            "type": event_type,
            "payload": payload,
        });
        self.send_raw(frame.to_string());
    }

    /// Push an arbitrary text frame
    pub fn send_raw(&self, text: impl Into<String>) {
        let _ = self.tx.send(MockEvent::Frame(text.into()));
    }

    /// Report a network error; the connection closes right after
    pub fn fail(&self, error: impl Into<String>) {
        let _ = self.tx.send(MockEvent::Error(error.into()));
    }

    /// Drop the connection from the server side
    pub fn drop_connection(&self) {
        let _ = self.tx.send(MockEvent::Drop(Some("dropped by server".into())));
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_next_opens(&self, n: usize) {
        self.state.lock().fail_opens = n;
    }

    /// Make every connection attempt take this long
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        self.state.lock().open_delay = delay;
    }

    /// Successful opens so far
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// Client-initiated closes of an open connection
    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().is_open
    }

    /// Every subscribe/unsubscribe call, in order
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Channels the current connection is subscribed to
    pub fn remote_channels(&self) -> BTreeSet<String> {
        self.state.lock().remote.clone()
    }
}
