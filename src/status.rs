//! Connection status snapshots
//!
//! [`StatusReporter`] projects the controller's locally held state into a
//! [`StatusSnapshot`] without I/O. [`router`] exposes it over HTTP and
//! [`StatusPoller`] is the polling side used by status widgets.

use crate::channels::ChannelRegistry;
use crate::controller::{ConnectionShared, ConnectionState};
use crate::error::{RealtimeError, Result};

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Point-in-time view of connection health
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusSnapshot {
    /// Snapshot used when the status itself could not be obtained
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Read-only projection of the connection state
#[derive(Clone)]
pub struct StatusReporter {
    shared: Arc<ConnectionShared>,
    registry: Arc<ChannelRegistry>,
    primary_channel: Option<String>,
    enabled: bool,
}

impl StatusReporter {
    pub fn new(
        shared: Arc<ConnectionShared>,
        registry: Arc<ChannelRegistry>,
        primary_channel: Option<String>,
        enabled: bool,
    ) -> Self {
        Self {
            shared,
            registry,
            primary_channel,
            enabled,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let record = self.shared.record();
        let connected = self.shared.state() == ConnectionState::Connected;

        let channel = match &self.primary_channel {
            Some(primary) if self.registry.has_channel(primary) => Some(primary.clone()),
            _ => self.registry.channels().into_iter().next(),
        };

        let error = if !self.enabled {
            Some("realtime disabled".to_string())
        } else if connected {
            None
        } else {
            record.last_error
        };

        StatusSnapshot {
            connected,
            cluster: Some(record.descriptor),
            channel,
            socket_id: if connected { record.socket_id } else { None },
            since: if connected { record.connected_since } else { None },
            error,
        }
    }
}

/// HTTP routes exposing the snapshot
pub fn router(reporter: StatusReporter) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(reporter)
}

async fn status_handler(State(reporter): State<StatusReporter>) -> Json<StatusSnapshot> {
    Json(reporter.snapshot())
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Serve the status routes until the task is cancelled
pub async fn serve_status(bind_addr: SocketAddr, reporter: StatusReporter) -> anyhow::Result<()> {
    let app = router(reporter);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "Status endpoint listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Fetch one snapshot; request or decode failures become a disconnected snapshot
pub async fn fetch_status(http: &reqwest::Client, url: &str) -> StatusSnapshot {
    match try_fetch_status(http, url).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            debug!(url = %url, "Status request failed: {}", e);
            StatusSnapshot::failed(e.to_string())
        }
    }
}

async fn try_fetch_status(http: &reqwest::Client, url: &str) -> Result<StatusSnapshot> {
    let response = http
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| RealtimeError::Status(e.to_string()))?;

    response
        .json::<StatusSnapshot>()
        .await
        .map_err(|e| RealtimeError::Status(e.to_string()))
}

/// Polls a status endpoint on an interval and publishes the latest snapshot
pub struct StatusPoller {
    rx: watch::Receiver<StatusSnapshot>,
    handle: JoinHandle<()>,
}

impl StatusPoller {
    pub fn spawn(url: impl Into<String>, interval: Duration) -> Self {
        let url = url.into();
        let (tx, rx) = watch::channel(StatusSnapshot::default());
        let http = reqwest::Client::builder()
            .timeout(interval.max(Duration::from_secs(1)))
            .build()
            .unwrap_or_default();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                let snapshot = fetch_status(&http, &url).await;
                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        });

        Self { rx, handle }
    }

    /// Most recent snapshot
    pub fn latest(&self) -> StatusSnapshot {
        self.rx.borrow().clone()
    }

    pub fn receiver(&self) -> watch::Receiver<StatusSnapshot> {
        self.rx.clone()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Filter;
    use crate::config::RealtimeConfig;
    use crate::controller::ReconnectionController;
    use crate::messages::InboundMessage;
    use crate::testing::{MockServer, MockTransport};

    struct Harness {
        controller: ReconnectionController,
        reporter: StatusReporter,
        registry: Arc<ChannelRegistry>,
        // Dropping the server closes the mock connection
        server: MockServer,
    }

    fn reporter_for(config: RealtimeConfig) -> Harness {
        let (transport, server) = MockTransport::pair();
        let registry = Arc::new(ChannelRegistry::new());
        let primary = config.primary_channel.clone();
        let enabled = config.enabled;
        let controller = ReconnectionController::new(config, Box::new(transport), registry.clone());
        let reporter = StatusReporter::new(controller.shared(), registry.clone(), primary, enabled);
        Harness {
            controller,
            reporter,
            registry,
            server,
        }
    }

    #[test]
    fn test_snapshot_serialization_skips_missing_fields() {
        let json = serde_json::to_string(&StatusSnapshot::failed("timeout")).unwrap();
        assert_eq!(json, r#"{"connected":false,"error":"timeout"}"#);
    }

    #[test]
    fn test_snapshot_deserializes_iso_since() {
        let snapshot: StatusSnapshot = serde_json::from_str(
            r#"{"connected":true,"cluster":"eu","channel":"public","socket_id":"1.2","since":"2026-10-19T08:00:00Z"}"#,
        )
        .unwrap();

        assert!(snapshot.connected);
        assert_eq!(snapshot.socket_id.as_deref(), Some("1.2"));
        assert_eq!(
            snapshot.since.unwrap().to_rfc3339(),
            "2026-10-19T08:00:00+00:00"
        );
    }

    #[test]
    fn test_snapshot_while_disconnected() {
        let Harness { reporter, .. } = reporter_for(RealtimeConfig::socket("ws://mock"));
        let snapshot = reporter.snapshot();

        assert!(!snapshot.connected);
        assert_eq!(snapshot.cluster.as_deref(), Some("mock"));
        assert!(snapshot.socket_id.is_none());
        assert!(snapshot.since.is_none());
        assert!(snapshot.channel.is_none());
    }

    #[test]
    fn test_snapshot_reports_disabled() {
        let Harness { reporter, .. } = reporter_for(RealtimeConfig::socket("ws://mock").disabled());
        assert_eq!(reporter.snapshot().error.as_deref(), Some("realtime disabled"));
    }

    #[test]
    fn test_snapshot_prefers_primary_channel() {
        let Harness {
            reporter, registry, ..
        } = reporter_for(RealtimeConfig::socket("ws://mock"));
        let noop = |_: &InboundMessage| {};

        registry.subscribe("leaderboard", Filter::Any, Arc::new(noop)).unwrap();
        assert_eq!(reporter.snapshot().channel.as_deref(), Some("leaderboard"));

        registry.subscribe("public", Filter::Any, Arc::new(noop)).unwrap();
        assert_eq!(reporter.snapshot().channel.as_deref(), Some("public"));
    }

    #[tokio::test]
    async fn test_snapshot_while_connected() {
        let Harness {
            controller,
            reporter,
            server,
            ..
        } = reporter_for(RealtimeConfig::socket("ws://mock"));

        controller.connect().await.unwrap();
        controller
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(2))
            .await
            .unwrap();

        let snapshot = reporter.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.socket_id.as_deref(), Some("mock.1"));
        assert!(snapshot.since.is_some());
        assert!(snapshot.error.is_none());
        assert!(server.is_open());

        controller.disconnect().await.unwrap();
        assert!(!reporter.snapshot().connected);
        assert_eq!(server.closes(), 1);
    }

    #[tokio::test]
    async fn test_fetch_status_failure_becomes_disconnected() {
        let http = reqwest::Client::new();
        let snapshot = fetch_status(&http, "http://127.0.0.1:1/status").await;

        assert!(!snapshot.connected);
        assert!(snapshot.error.is_some());
    }
}
