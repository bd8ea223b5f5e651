//! Reconnection controller
//!
//! Owns the transport and the single physical connection. A session task runs
//! the state machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --open ok--> Connected
//! Connecting --open failed--> Reconnecting | Disconnected (budget spent / no reconnect)
//! Connected --closed--> Reconnecting --delay elapsed--> Connecting
//! any --disconnect()--> Disconnected
//! ```
//!
//! On every successful open, all channels live in the registry are subscribed
//! again before the state becomes `Connected`.

use crate::backoff::Backoff;
use crate::channels::{ChannelChange, ChannelRegistry};
use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, Result};
use crate::transport::{SessionInfo, Transport, TransportEvent, TransportKind};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to connect
    Disconnected,
    /// Opening the connection
    Connecting,
    /// Connected and all channels subscribed
    Connected,
    /// Waiting out the backoff delay before the next attempt
    Reconnecting,
}

/// Locally held facts about the connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    pub transport: TransportKind,
    /// Cluster or endpoint the transport dials
    pub descriptor: String,
    pub socket_id: Option<String>,
    /// Time of the last successful open
    pub connected_since: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Successful opens after the first one
    pub reconnects: u64,
}

/// State shared between the controller, its session task and status readers
pub struct ConnectionShared {
    state: watch::Sender<ConnectionState>,
    record: RwLock<ConnectionRecord>,
}

impl ConnectionShared {
    fn new(transport: TransportKind, descriptor: String) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            record: RwLock::new(ConnectionRecord {
                transport,
                descriptor,
                socket_id: None,
                connected_since: None,
                last_error: None,
                reconnects: 0,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn record(&self) -> ConnectionRecord {
        self.record.read().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    fn mark_connected(&self, session: SessionInfo) {
        {
            let mut record = self.record.write();
            if record.connected_since.is_some() {
                record.reconnects += 1;
            }
            record.socket_id = session.socket_id;
            record.connected_since = Some(Utc::now());
            record.last_error = None;
        }
        self.set_state(ConnectionState::Connected);
    }

    fn mark_lost(&self) {
        self.record.write().socket_id = None;
    }

    fn record_error(&self, error: impl Into<String>) {
        self.record.write().last_error = Some(error.into());
    }
}

/// Remote subscription changes queued for the session task
#[derive(Debug)]
enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

struct Session {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Box<dyn Transport>>,
}

struct Lifecycle {
    // Parked here while no session is running
    transport: Option<Box<dyn Transport>>,
    session: Option<Session>,
}

pub struct ReconnectionController {
    config: RealtimeConfig,
    registry: Arc<ChannelRegistry>,
    shared: Arc<ConnectionShared>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl ReconnectionController {
    pub fn new(
        config: RealtimeConfig,
        transport: Box<dyn Transport>,
        registry: Arc<ChannelRegistry>,
    ) -> Self {
        let shared = Arc::new(ConnectionShared::new(
            transport.kind(),
            transport.descriptor(),
        ));

        Self {
            config,
            registry,
            shared,
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                transport: Some(transport),
                session: None,
            }),
            commands: Mutex::new(None),
        }
    }

    pub fn shared(&self) -> Arc<ConnectionShared> {
        self.shared.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.subscribe_state()
    }

    /// Start connecting. Returns once the session task is running; use
    /// [`wait_for_state`](Self::wait_for_state) to wait for the outcome.
    ///
    /// A no-op when realtime is disabled or a session is already running.
    pub async fn connect(&self) -> Result<()> {
        if !self.config.enabled {
            debug!("Realtime disabled, not connecting");
            return Ok(());
        }

        let mut lifecycle = self.lifecycle.lock().await;

        if let Some(session) = lifecycle.session.take() {
            // A session only settles into Disconnected right before it returns
            if self.shared.state() != ConnectionState::Disconnected {
                lifecycle.session = Some(session);
                return Ok(());
            }
            lifecycle.transport = reclaim(session.handle).await;
        }

        let transport = lifecycle.transport.take().ok_or(RealtimeError::Shutdown)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.commands.lock() = Some(command_tx);

        self.shared.set_state(ConnectionState::Connecting);

        let task = SessionTask {
            config: self.config.clone(),
            registry: self.registry.clone(),
            shared: self.shared.clone(),
            transport,
            commands: command_rx,
            shutdown: shutdown_rx,
            remote: HashSet::new(),
            backoff: Backoff::from_config(&self.config),
        };
        let handle = tokio::spawn(task.run());

        lifecycle.session = Some(Session {
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Stop the session from any state and release the connection.
    ///
    /// Cancels a pending backoff wait or an in-flight open. The controller stays
    /// inert until `connect()` is called again.
    pub async fn disconnect(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        *self.commands.lock() = None;

        if let Some(session) = lifecycle.session.take() {
            let Session { shutdown, handle } = session;
            let _ = shutdown.send(());
            lifecycle.transport = reclaim(handle).await;
        }

        self.shared.mark_lost();
        self.shared.set_state(ConnectionState::Disconnected);
        info!("Disconnected");
        Ok(())
    }

    /// Forward a registry change to the running session, if any.
    ///
    /// While no session runs the change is dropped; the next session replays
    /// the registry anyway.
    pub fn notify(&self, change: ChannelChange) {
        let command = match change {
            ChannelChange::Materialized(channel) => Command::Subscribe(channel),
            ChannelChange::Released(channel) => Command::Unsubscribe(channel),
            ChannelChange::Unchanged => return,
        };

        if let Some(tx) = self.commands.lock().as_ref() {
            let _ = tx.send(command);
        }
    }

    /// Wait until the controller reaches `target`
    pub async fn wait_for_state(&self, target: ConnectionState, limit: Duration) -> Result<()> {
        let mut rx = self.shared.subscribe_state();
        tokio::time::timeout(limit, rx.wait_for(|state| *state == target))
            .await
            .map_err(|_| RealtimeError::Timeout)?
            .map_err(|_| RealtimeError::Shutdown)?;
        Ok(())
    }
}

impl Drop for ReconnectionController {
    fn drop(&mut self) {
        if let Some(session) = self.lifecycle.get_mut().session.take() {
            let _ = session.shutdown.send(());
        }
    }
}

async fn reclaim(handle: JoinHandle<Box<dyn Transport>>) -> Option<Box<dyn Transport>> {
    match handle.await {
        Ok(transport) => Some(transport),
        Err(e) => {
            error!("Session task failed: {}", e);
            None
        }
    }
}

enum Outcome {
    Shutdown,
    Lost,
}

struct SessionTask {
    config: RealtimeConfig,
    registry: Arc<ChannelRegistry>,
    shared: Arc<ConnectionShared>,
    transport: Box<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: oneshot::Receiver<()>,
    // Channels subscribed on the current connection
    remote: HashSet<String>,
    backoff: Backoff,
}

impl SessionTask {
    async fn run(mut self) -> Box<dyn Transport> {
        loop {
            self.shared.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                biased;
                _ = &mut self.shutdown => {
                    debug!("Shutdown during connect");
                    self.transport.close().await;
                    return self.transport;
                }
                result = self.transport.open() => result,
            };

            let outcome = match opened {
                Ok(session) => match self.replay().await {
                    Ok(()) => {
                        self.backoff.reset();
                        info!(
                            transport = %self.transport.kind(),
                            socket_id = ?session.socket_id,
                            channels = self.remote.len(),
                            "Connected"
                        );
                        self.shared.mark_connected(session);
                        self.serve().await
                    }
                    Err(e) => {
                        warn!("Failed to resubscribe: {}", e);
                        self.shared.record_error(e.to_string());
                        Outcome::Lost
                    }
                },
                Err(e) => {
                    warn!(attempt = self.backoff.attempts() + 1, "Connect failed: {}", e);
                    self.shared.record_error(e.to_string());
                    Outcome::Lost
                }
            };

            self.transport.close().await;
            self.shared.mark_lost();

            if let Outcome::Shutdown = outcome {
                return self.transport;
            }

            if !self.config.auto_reconnect {
                info!("Connection lost, reconnect disabled");
                self.shared.set_state(ConnectionState::Disconnected);
                return self.transport;
            }

            let Some(delay) = self.backoff.next_delay() else {
                warn!(
                    attempts = self.backoff.attempts(),
                    "Reconnect attempts exhausted, giving up"
                );
                self.shared.set_state(ConnectionState::Disconnected);
                return self.transport;
            };

            self.shared.set_state(ConnectionState::Reconnecting);
            info!("Reconnecting in {:?}...", delay);

            tokio::select! {
                biased;
                _ = &mut self.shutdown => {
                    debug!("Shutdown during backoff");
                    return self.transport;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Subscribe every live channel on a fresh connection
    async fn replay(&mut self) -> Result<()> {
        self.remote.clear();
        for channel in self.registry.channels() {
            self.transport.subscribe(&channel).await?;
            self.remote.insert(channel);
        }
        Ok(())
    }

    /// Pump events until the connection is lost or shutdown is requested
    async fn serve(&mut self) -> Outcome {
        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => return Outcome::Shutdown,
                Some(command) = self.commands.recv() => {
                    if let Err(e) = self.apply(command).await {
                        warn!("Remote subscription update failed: {}", e);
                        self.shared.record_error(e.to_string());
                        return Outcome::Lost;
                    }
                }
                event = self.transport.next_event() => match event {
                    TransportEvent::Message(msg) => {
                        self.registry.dispatch(&msg);
                    }
                    TransportEvent::Error(e) => {
                        warn!("Transport error: {}", e);
                        self.shared.record_error(e);
                    }
                    TransportEvent::Closed(reason) => {
                        info!(reason = ?reason, "Connection closed");
                        if let Some(reason) = reason {
                            self.shared.record_error(format!("connection closed: {}", reason));
                        }
                        return Outcome::Lost;
                    }
                },
            }
        }
    }

    /// Reconcile one queued change against what the registry holds now
    async fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Subscribe(channel) => {
                if self.registry.has_channel(&channel) && !self.remote.contains(&channel) {
                    self.transport.subscribe(&channel).await?;
                    self.remote.insert(channel);
                }
            }
            Command::Unsubscribe(channel) => {
                if !self.registry.has_channel(&channel) && self.remote.remove(&channel) {
                    self.transport.unsubscribe(&channel).await?;
                }
            }
        }
        Ok(())
    }
}
