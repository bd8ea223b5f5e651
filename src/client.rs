//! Realtime client
//!
//! The consumer-facing handle tying the registry, the reconnection controller
//! and the status reporter together.

use crate::channels::{ChannelRegistry, Filter, MessageHandler, SubscriptionId};
use crate::config::RealtimeConfig;
use crate::controller::{ConnectionState, ReconnectionController};
use crate::error::Result;
use crate::messages::InboundMessage;
use crate::status::{StatusReporter, StatusSnapshot};
use crate::transport::{self, Transport};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Handlers keyed by message type, routed through a single subscription
#[derive(Default, Clone)]
pub struct TypeHandlers {
    routes: Vec<(String, MessageHandler)>,
}

impl TypeHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for one message type. Several handlers may share a type;
    /// they run in the order they were added.
    pub fn on<F>(mut self, event_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.routes.push((event_type.into(), Arc::new(handler)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for (event_type, _) in &self.routes {
            if !types.contains(event_type) {
                types.push(event_type.clone());
            }
        }
        types
    }

    fn into_handler(self) -> MessageHandler {
        Arc::new(move |msg: &InboundMessage| {
            for (event_type, handler) in &self.routes {
                if msg.is_type(event_type) {
                    handler(msg);
                }
            }
        })
    }
}

/// A live subscription handle
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    channel: String,
    client: Arc<ClientInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether the subscription is still registered
    pub fn is_active(&self) -> bool {
        self.client.registry.channel_of(self.id).is_some()
    }

    /// Stop delivery to this subscription. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        self.client.remove(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish()
    }
}

struct ClientInner {
    config: RealtimeConfig,
    registry: Arc<ChannelRegistry>,
    controller: ReconnectionController,
    reporter: StatusReporter,
}

impl ClientInner {
    fn remove(&self, id: SubscriptionId) {
        let change = self.registry.unsubscribe(id);
        debug!(subscription = %id, change = ?change, "Unsubscribed");
        self.controller.notify(change);
    }
}

/// Realtime notification client
///
/// Keeps one connection to the backend and fans inbound messages out to
/// subscribers. Cheaply cloneable.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    /// Create a client over an already constructed transport
    pub fn new(config: RealtimeConfig, transport: Box<dyn Transport>) -> Self {
        let registry = Arc::new(ChannelRegistry::new());
        let controller = ReconnectionController::new(config.clone(), transport, registry.clone());
        let reporter = StatusReporter::new(
            controller.shared(),
            registry.clone(),
            config.primary_channel.clone(),
            config.enabled,
        );

        Self {
            inner: Arc::new(ClientInner {
                config,
                registry,
                controller,
                reporter,
            }),
        }
    }

    /// Create a client with the transport the configuration names
    pub fn from_config(config: RealtimeConfig) -> Result<Self> {
        let transport = transport::build(&config)?;
        Ok(Self::new(config, transport))
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Start connecting in the background. A no-op when disabled or already
    /// connecting.
    pub async fn connect(&self) -> Result<()> {
        self.inner.controller.connect().await
    }

    /// Close the connection and stop reconnecting. Subscriptions are kept and
    /// resume on the next `connect()`.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.controller.disconnect().await
    }

    /// Receive every message on a channel
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.subscribe_filtered(channel, Filter::Any, handler)
    }

    /// Receive the messages on a channel accepted by `filter`
    pub fn subscribe_filtered<F>(
        &self,
        channel: &str,
        filter: Filter,
        handler: F,
    ) -> Result<Subscription>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.register(channel, filter, Arc::new(handler))
    }

    /// Receive messages of one type on a channel
    pub fn on_type<F>(&self, channel: &str, event_type: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.subscribe_filtered(channel, Filter::Type(event_type.to_string()), handler)
    }

    /// Route messages to handlers by type through one subscription
    pub fn on_types(&self, channel: &str, handlers: TypeHandlers) -> Result<Subscription> {
        let filter = Filter::Types(handlers.types());
        self.register(channel, filter, handlers.into_handler())
    }

    /// Same as [`Subscription::unsubscribe`]
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.inner.remove(subscription.id);
    }

    fn register(&self, channel: &str, filter: Filter, handler: MessageHandler) -> Result<Subscription> {
        let (id, change) = self.inner.registry.subscribe(channel, filter, handler)?;
        debug!(channel = %channel, subscription = %id, change = ?change, "Subscribed");
        self.inner.controller.notify(change);

        Ok(Subscription {
            id,
            channel: channel.to_string(),
            client: self.inner.clone(),
        })
    }

    /// Current status, computed from local state only
    pub fn status(&self) -> StatusSnapshot {
        self.inner.reporter.snapshot()
    }

    /// Reporter handle for serving the status elsewhere
    pub fn status_reporter(&self) -> StatusReporter {
        self.inner.reporter.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.controller.state()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.controller.state_receiver()
    }

    pub async fn wait_for_state(&self, target: ConnectionState, limit: Duration) -> Result<()> {
        self.inner.controller.wait_for_state(target, limit).await
    }

    /// Channels with at least one subscription
    pub fn channels(&self) -> Vec<String> {
        self.inner.registry.channels()
    }

    /// Handler panics caught during dispatch
    pub fn handler_failures(&self) -> u64 {
        self.inner.registry.handler_failures()
    }
}
