use anyhow::{anyhow, Context, Result};
use async_stream::stream;
use fanout_cache::Cache;
use fanout_core::{
    Key, RawUpdate, SyncStatus, UpdateKind, UpstreamClient, UpstreamEvent, UpstreamStream,
};
use futures::prelude::*;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
    sync::watch,
    time,
};
use tracing::{debug, info, warn};

const BACKOFF_MIN: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(15);

/// How often staged state is committed even when the upstream is quiet, so
/// status-only transitions are not starved.
const COMMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the cache's writer half and keeps it fed from the upstream watch,
/// re-establishing the watch with backoff whenever it fails. Peers stay
/// connected across upstream failures.
pub struct Driver {
    cache: Cache,
    client: Arc<dyn UpstreamClient>,

    /// Mirrors the committed sync status for the admin readiness endpoint.
    status: watch::Sender<SyncStatus>,
}

// === impl Driver ===

impl Driver {
    pub fn new(
        cache: Cache,
        client: Arc<dyn UpstreamClient>,
        status: watch::Sender<SyncStatus>,
    ) -> Self {
        Self {
            cache,
            client,
            status,
        }
    }

    pub async fn run(mut self, drain: drain::Watch) {
        let mut backoff = BACKOFF_MIN;
        loop {
            let stream = tokio::select! {
                res = self.client.watch() => res,
                _ = drain.clone().signaled() => break,
            };

            match stream {
                Ok(events) => {
                    info!("Upstream watch established");
                    backoff = BACKOFF_MIN;
                    if self.drain_events(events, &drain).await {
                        break;
                    }
                }
                Err(error) => warn!(%error, "Failed to establish upstream watch"),
            }

            // The watch is gone; tell peers the view may be incomplete while
            // we re-establish it.
            self.cache.on_status(SyncStatus::Resync);
            self.cache.commit();
            let _ = self.status.send(SyncStatus::Resync);

            debug!(?backoff, "Waiting to reconnect to the upstream");
            tokio::select! {
                _ = time::sleep(backoff) => {}
                _ = drain.clone().signaled() => break,
            }
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }

        // Seal anything still staged so departing peers aren't left
        // mid-batch.
        self.cache.commit();
        info!("Upstream driver stopped");
    }

    /// Applies the watch's events until it ends. Returns true on shutdown.
    async fn drain_events(&mut self, mut events: UpstreamStream, drain: &drain::Watch) -> bool {
        let mut commit_tick = time::interval(COMMIT_INTERVAL);
        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(UpstreamEvent::Updates(batch)) => {
                        for update in &batch {
                            self.cache.on_update(update);
                        }
                        self.cache.commit();
                    }
                    Some(UpstreamEvent::Status(status)) => {
                        info!(%status, "Upstream status");
                        self.cache.on_status(status);
                        self.cache.commit();
                        let _ = self.status.send(status);
                    }
                    None => {
                        warn!("Upstream watch ended");
                        return false;
                    }
                },

                _ = commit_tick.tick() => self.cache.commit(),

                _ = drain.clone().signaled() => return true,
            }
        }
    }
}

/// The datastore's native watch: a TCP stream of newline-delimited JSON
/// events, one status or update per line.
#[derive(Clone, Debug)]
pub struct JsonLineClient {
    addr: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum WatchLine {
    Status {
        status: SyncStatus,
    },
    Update {
        key: String,
        #[serde(default)]
        value: Option<serde_json::Value>,
        revision: String,
        #[serde(default)]
        ttl_secs: u64,
        kind: UpdateKind,
    },
}

// === impl JsonLineClient ===

impl JsonLineClient {
    pub fn new(addr: String) -> Self {
        Self { addr }
    }
}

#[async_trait::async_trait]
impl UpstreamClient for JsonLineClient {
    async fn watch(&self) -> Result<UpstreamStream> {
        let socket = TcpStream::connect(&self.addr)
            .await
            .with_context(|| format!("connecting to upstream {}", self.addr))?;
        let mut lines = BufReader::new(socket).lines();

        Ok(Box::pin(stream! {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match parse_line(&line) {
                            Ok(event) => yield event,
                            Err(error) => warn!(%error, "Skipping malformed upstream event"),
                        }
                    }
                    Ok(None) => return,
                    Err(error) => {
                        warn!(%error, "Upstream read failed");
                        return;
                    }
                }
            }
        }))
    }
}

fn parse_line(line: &str) -> Result<UpstreamEvent> {
    let event = match serde_json::from_str::<WatchLine>(line)? {
        WatchLine::Status { status } => UpstreamEvent::Status(status),
        WatchLine::Update {
            key,
            value,
            revision,
            ttl_secs,
            kind,
        } => {
            let key = Key::parse_path(&key).map_err(|error| anyhow!("{}: {:?}", error, key))?;
            UpstreamEvent::Updates(vec![RawUpdate {
                key,
                value,
                revision,
                ttl: Duration::from_secs(ttl_secs),
                kind,
            }])
        }
    };
    Ok(event)
}
