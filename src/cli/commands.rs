//! CLI command definitions

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "classcast")]
#[command(about = "Realtime notification client", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Transport to use: socket or managed
    #[arg(long, env = "CLASSCAST_TRANSPORT", global = true)]
    pub transport: Option<String>,

    /// Socket URL, or host override for the managed transport
    #[arg(long, env = "CLASSCAST_URL", global = true)]
    pub url: Option<String>,

    /// Managed service application key
    #[arg(long, env = "CLASSCAST_APP_KEY", global = true)]
    pub app_key: Option<String>,

    /// Managed service cluster
    #[arg(long, env = "CLASSCAST_CLUSTER", global = true)]
    pub cluster: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and log every delivered message
    ///
    /// Examples:
    ///   classcast listen -c public
    ///   classcast listen -c leaderboard:class-5a -t rank-changed --status-bind 127.0.0.1:8080
    Listen {
        /// Channel(s) to subscribe to
        #[arg(short, long = "channel", value_parser = parse_channel, required = true)]
        channel: Vec<String>,

        /// Only deliver messages of this type (can be repeated)
        #[arg(short = 't', long = "type")]
        event_type: Vec<String>,

        /// Serve the status endpoint on this address
        #[arg(long, env = "CLASSCAST_STATUS_BIND")]
        status_bind: Option<String>,
    },

    /// Fetch a status snapshot from a running status endpoint
    Status {
        /// Status endpoint URL
        #[arg(long, default_value = "http://127.0.0.1:8080/status")]
        url: String,

        /// Keep polling on the configured interval
        #[arg(short, long)]
        watch: bool,
    },
}

fn parse_channel(s: &str) -> Result<String, String> {
    classcast::channels::validate_channel(s)
        .map(|_| s.to_string())
        .map_err(|e| e.to_string())
}
