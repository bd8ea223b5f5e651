//! Classcast CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use classcast::channels::Filter;
use classcast::status::{fetch_status, serve_status};
use classcast::{
    InboundMessage, RealtimeClient, RealtimeConfig, StatusPoller, StatusSnapshot, TransportKind,
};
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Listen {
            ref channel,
            ref event_type,
            ref status_bind,
        } => {
            let config = build_config(&cli)?;
            listen(config, channel.clone(), event_type.clone(), status_bind.clone()).await
        }
        Commands::Status { ref url, watch } => {
            let config = RealtimeConfig::from_env().context("Invalid CLASSCAST_* environment")?;
            if watch {
                watch_status(url.clone(), config.status_poll_interval).await
            } else {
                status(url.clone()).await
            }
        }
    }
}

/// Environment first, flags on top
fn build_config(cli: &Cli) -> Result<RealtimeConfig> {
    let mut config = RealtimeConfig::from_env().context("Invalid CLASSCAST_* environment")?;

    if let Some(kind) = &cli.transport {
        config.transport = kind.parse::<TransportKind>().context("Invalid --transport")?;
    }
    if let Some(url) = &cli.url {
        config.url = Some(url.clone());
    }
    if let Some(app_key) = &cli.app_key {
        config.app_key = Some(app_key.clone());
    }
    if let Some(cluster) = &cli.cluster {
        config.cluster = cluster.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn listen(
    config: RealtimeConfig,
    channels: Vec<String>,
    event_types: Vec<String>,
    status_bind: Option<String>,
) -> Result<()> {
    let client = RealtimeClient::from_config(config).context("Failed to build transport")?;

    let filter = match event_types.len() {
        0 => Filter::Any,
        1 => Filter::Type(event_types[0].clone()),
        _ => Filter::Types(event_types),
    };

    let mut subscriptions = Vec::with_capacity(channels.len());
    for channel in &channels {
        let sub = client
            .subscribe_filtered(channel, filter.clone(), |msg: &InboundMessage| {
                info!(
                    channel = %msg.channel,
                    event_type = %msg.event_type,
                    payload = %msg.payload,
                    "Message"
                );
            })
            .with_context(|| format!("Invalid channel: {}", channel))?;
        subscriptions.push(sub);
    }

    if let Some(bind) = status_bind {
        let bind_addr = bind.parse().context("Invalid status bind address")?;
        let reporter = client.status_reporter();
        tokio::spawn(async move {
            if let Err(e) = serve_status(bind_addr, reporter).await {
                warn!("Status endpoint stopped: {}", e);
            }
        });
    }

    info!(channels = ?channels, "Starting listener...");
    client.connect().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    for sub in &subscriptions {
        sub.unsubscribe();
    }
    client.disconnect().await?;

    Ok(())
}

async fn status(url: String) -> Result<()> {
    let http = reqwest::Client::new();
    let snapshot = fetch_status(&http, &url).await;
    print_status(&snapshot);
    Ok(())
}

async fn watch_status(url: String, interval: Duration) -> Result<()> {
    let poller = StatusPoller::spawn(url, interval);
    let mut rx = poller.receiver();

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                print_status(&snapshot);
                println!();
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

fn print_status(snapshot: &StatusSnapshot) {
    println!("Classcast Status");
    println!("================");
    println!("Connected: {}", if snapshot.connected { "yes" } else { "no" });
    if let Some(cluster) = &snapshot.cluster {
        println!("Cluster:   {}", cluster);
    }
    if let Some(channel) = &snapshot.channel {
        println!("Channel:   {}", channel);
    }
    if let Some(socket_id) = &snapshot.socket_id {
        println!("Socket ID: {}", socket_id);
    }
    if let Some(since) = &snapshot.since {
        println!("Since:     {}", since.to_rfc3339());
    }
    if let Some(error) = &snapshot.error {
        println!("Error:     {}", error);
    }
}
