//! Classcast - realtime notification core
//!
//! Keeps one long-lived connection to a message distribution backend (a raw
//! WebSocket server or a managed pub/sub service), reconnects with backoff, and
//! fans inbound messages out to channel subscribers filtered by type.
//!
//! # Example
//!
//! ```no_run
//! use classcast::{RealtimeClient, RealtimeConfig, TypeHandlers};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RealtimeConfig::managed("app-key", "eu");
//!     let client = RealtimeClient::from_config(config)?;
//!
//!     // Every message on a channel
//!     let _public = client.subscribe("public", |msg| {
//!         println!("{} on {}: {}", msg.event_type, msg.channel, msg.payload);
//!     })?;
//!
//!     // Handlers by type, routed through one subscription
//!     let _board = client.on_types(
//!         "leaderboard:class-5a",
//!         TypeHandlers::new()
//!             .on("rank-changed", |msg| println!("rank: {}", msg.payload))
//!             .on("score-updated", |msg| println!("score: {}", msg.payload)),
//!     )?;
//!
//!     client.connect().await?;
//!     println!("{:?}", client.status());
//!
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod channels;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod messages;
pub mod status;
pub mod testing;
pub mod transport;

pub use channels::{ChannelChange, ChannelRegistry, Filter, MessageHandler, SubscriptionId};
pub use client::{RealtimeClient, Subscription, TypeHandlers};
pub use config::RealtimeConfig;
pub use controller::{ConnectionRecord, ConnectionState};
pub use error::{RealtimeError, Result};
pub use messages::InboundMessage;
pub use status::{StatusPoller, StatusReporter, StatusSnapshot};
pub use transport::{Transport, TransportEvent, TransportKind};
