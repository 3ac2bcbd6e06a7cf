use anyhow::{bail, Result};
use clap::Parser;
use std::{net::SocketAddr, str::FromStr, time::Duration};

#[derive(Debug, Parser)]
#[clap(name = "fanout-hub", about = "Fans a datastore watch out to enforcement agents")]
pub struct Args {
    #[clap(long, default_value = "fanout=info,warn", env = "FANOUT_HUB_LOG")]
    log_level: String,

    #[clap(long, default_value = "plain")]
    log_format: LogFormat,

    /// Address the sync server listens on.
    #[clap(long, default_value = "0.0.0.0:5473")]
    listen_addr: SocketAddr,

    #[clap(long, default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,

    /// Address of the upstream datastore's watch endpoint.
    #[clap(long)]
    upstream_addr: String,

    /// Seconds between liveness pings to each peer.
    #[clap(long, default_value = "10")]
    ping_interval: f64,

    /// Seconds of ping silence after which a peer is presumed dead.
    ///
    /// Defaults to twice the ping interval.
    #[clap(long)]
    pong_timeout: Option<f64>,

    /// Soft cap on the update bytes packed into a single kvs frame.
    #[clap(long, default_value = "16384")]
    max_payload_bytes: usize,

    /// Maximum number of concurrently connected peers.
    #[clap(long, default_value = "1024")]
    max_peers: usize,
}

/// Runtime configuration distilled from the CLI arguments.
#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub upstream_addr: String,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub max_payload_bytes: usize,
    pub max_peers: usize,
}

#[derive(Copy, Clone, Debug)]
enum LogFormat {
    Plain,
    Json,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid log format: {0:?} (expected 'plain' or 'json')")]
struct InvalidLogFormat(String);

// === impl Args ===

impl Args {
    pub fn init_tracing(&self) {
        let filter = tracing_subscriber::EnvFilter::new(&self.log_level);
        match self.log_format {
            LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
            LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        }
    }

    pub fn config(&self) -> Result<Config> {
        if self.ping_interval <= 0.0 {
            bail!("--ping-interval must be positive");
        }
        let ping_interval = Duration::from_secs_f64(self.ping_interval);
        let pong_timeout = match self.pong_timeout {
            Some(secs) if secs <= 0.0 => bail!("--pong-timeout must be positive"),
            Some(secs) => Duration::from_secs_f64(secs),
            None => ping_interval * 2,
        };
        if self.max_payload_bytes == 0 {
            bail!("--max-payload-bytes must be positive");
        }
        if self.max_peers == 0 {
            bail!("--max-peers must be positive");
        }

        Ok(Config {
            listen_addr: self.listen_addr,
            admin_addr: self.admin_addr,
            upstream_addr: self.upstream_addr.clone(),
            ping_interval,
            pong_timeout,
            max_payload_bytes: self.max_payload_bytes,
            max_peers: self.max_peers,
        })
    }
}

// === impl LogFormat ===

impl FromStr for LogFormat {
    type Err = InvalidLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => Err(InvalidLogFormat(other.to_string())),
        }
    }
}
