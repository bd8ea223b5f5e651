//! Channel naming and the subscription registry
//!
//! Channels are segments separated by `.` or `:`: `public`, `leaderboard:class-5a`,
//! `lesson.42.presence`. Each segment must match `[a-zA-Z0-9_-]+`.
//!
//! A channel exists only while at least one subscription references it. The
//! registry tells its caller when a channel materializes or is released so the
//! remote subscription can follow.

use crate::error::{RealtimeError, Result};
use crate::messages::InboundMessage;

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};
use uuid::Uuid;

/// Longest channel name accepted
pub const MAX_CHANNEL_LEN: usize = 200;

fn is_valid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Validate a channel name
pub fn validate_channel(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RealtimeError::InvalidChannel("channel name cannot be empty".into()));
    }

    if name.len() > MAX_CHANNEL_LEN {
        return Err(RealtimeError::InvalidChannel(format!(
            "channel name longer than {} bytes",
            MAX_CHANNEL_LEN
        )));
    }

    for segment in name.split(['.', ':']) {
        if segment.is_empty() {
            return Err(RealtimeError::InvalidChannel(format!(
                "empty segment in '{}'",
                name
            )));
        }
        if !segment.chars().all(is_valid_segment_char) {
            return Err(RealtimeError::InvalidChannel(format!(
                "invalid segment '{}': must match [a-zA-Z0-9_-]+",
                segment
            )));
        }
    }

    Ok(())
}

/// Handler for delivered messages
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Caller-supplied filter deciding whether a message reaches a handler
pub type MessagePredicate = Arc<dyn Fn(&InboundMessage) -> bool + Send + Sync>;

/// Which messages on a channel a subscription receives
#[derive(Clone, Default)]
pub enum Filter {
    /// Every message on the channel
    #[default]
    Any,
    /// Messages of one type
    Type(String),
    /// Messages of any of the listed types
    Types(Vec<String>),
    /// Messages accepted by a predicate
    Predicate(MessagePredicate),
}

impl Filter {
    /// Build a predicate filter
    pub fn predicate<P>(predicate: P) -> Self
    where
        P: Fn(&InboundMessage) -> bool + Send + Sync + 'static,
    {
        Filter::Predicate(Arc::new(predicate))
    }

    pub fn matches(&self, msg: &InboundMessage) -> bool {
        match self {
            Filter::Any => true,
            Filter::Type(t) => msg.event_type == *t,
            Filter::Types(types) => types.iter().any(|t| *t == msg.event_type),
            Filter::Predicate(p) => p(msg),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Any => write!(f, "Any"),
            Filter::Type(t) => f.debug_tuple("Type").field(t).finish(),
            Filter::Types(types) => f.debug_tuple("Types").field(types).finish(),
            Filter::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// Opaque identifier of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Effect of a subscribe/unsubscribe on the set of live channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelChange {
    /// First subscription for this channel
    Materialized(String),
    /// Last subscription for this channel was removed
    Released(String),
    Unchanged,
}

struct Entry {
    id: SubscriptionId,
    filter: Filter,
    handler: MessageHandler,
    active: AtomicBool,
}

#[derive(Default)]
struct RegistryInner {
    // Entries per channel, in registration order
    channels: BTreeMap<String, Vec<Arc<Entry>>>,
    index: HashMap<SubscriptionId, String>,
}

/// Maps channel names to their subscribers and dispatches inbound messages
#[derive(Default)]
pub struct ChannelRegistry {
    inner: Mutex<RegistryInner>,
    handler_failures: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler on a channel
    pub fn subscribe(
        &self,
        channel: &str,
        filter: Filter,
        handler: MessageHandler,
    ) -> Result<(SubscriptionId, ChannelChange)> {
        validate_channel(channel)?;

        let id = SubscriptionId::new();
        let entry = Arc::new(Entry {
            id,
            filter,
            handler,
            active: AtomicBool::new(true),
        });

        let mut inner = self.inner.lock();
        let entries = inner.channels.entry(channel.to_string()).or_default();
        let first = entries.is_empty();
        entries.push(entry);
        inner.index.insert(id, channel.to_string());

        trace!(channel = %channel, subscription = %id, "Subscribed");

        let change = if first {
            ChannelChange::Materialized(channel.to_string())
        } else {
            ChannelChange::Unchanged
        };
        Ok((id, change))
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> ChannelChange {
        let mut inner = self.inner.lock();

        let Some(channel) = inner.index.remove(&id) else {
            return ChannelChange::Unchanged;
        };

        let released = match inner.channels.get_mut(&channel) {
            Some(entries) => {
                if let Some(pos) = entries.iter().position(|e| e.id == id) {
                    let entry = entries.remove(pos);
                    // A dispatch holding a snapshot must skip this entry from now on
                    entry.active.store(false, Ordering::Release);
                }
                entries.is_empty()
            }
            None => false,
        };

        trace!(channel = %channel, subscription = %id, "Unsubscribed");

        if released {
            inner.channels.remove(&channel);
            ChannelChange::Released(channel)
        } else {
            ChannelChange::Unchanged
        }
    }

    /// Deliver a message to every matching subscription on its channel.
    ///
    /// Handlers run in registration order outside the registry lock, so a handler
    /// may subscribe or unsubscribe. A panicking handler or predicate is logged
    /// and skipped; the rest still run. Returns the number of handlers invoked.
    pub fn dispatch(&self, msg: &InboundMessage) -> usize {
        let entries = match self.inner.lock().channels.get(&msg.channel) {
            Some(entries) => entries.clone(),
            None => {
                trace!(channel = %msg.channel, "No subscribers, dropping message");
                return 0;
            }
        };

        let mut delivered = 0;
        for entry in entries {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if entry.filter.matches(msg) {
                    (entry.handler)(msg);
                    true
                } else {
                    false
                }
            }));

            match outcome {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(panic) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        channel = %msg.channel,
                        event_type = %msg.event_type,
                        subscription = %entry.id,
                        "Handler panicked: {}",
                        panic_message(&panic)
                    );
                }
            }
        }

        delivered
    }

    /// Currently live channels
    pub fn channels(&self) -> Vec<String> {
        self.inner.lock().channels.keys().cloned().collect()
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.inner.lock().channels.contains_key(channel)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Channel a subscription belongs to, if it is still registered
    pub fn channel_of(&self, id: SubscriptionId) -> Option<String> {
        self.inner.lock().index.get(&id).cloned()
    }

    /// Total number of subscriptions
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handler panics caught since creation
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
