use crate::Config;
use fanout_cache::{CacheReader, Follower, Snapshot};
use fanout_proto::{
    read_message, write_message, Kvs, Message, Ping, Pong, SerializedUpdate, ServerHello,
    WireError, PROTOCOL_VERSION,
};
use parking_lot::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
    time,
};
use tracing::{debug, info, trace, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Depth of the per-peer outbound buffer, in messages. Once the socket and
/// this buffer are full the sender blocks, its follower falls behind, and
/// catch-up coalescing caps what the peer eventually drains.
const SEND_BUFFER_MESSAGES: usize = 32;

/// One peer session: handshake, snapshot replay, live-delta forwarding, and
/// ping/pong liveness.
pub struct Connection {
    cache: CacheReader,
    ping_interval: Duration,
    pong_timeout: Duration,
    max_payload_bytes: usize,
}

/// Why a session ended.
#[derive(Debug, thiserror::Error)]
enum Close {
    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("pong timeout")]
    PongTimeout,

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("hub shutting down")]
    Shutdown,

    #[error("cache shut down")]
    CacheClosed,
}

// === impl Connection ===

impl Connection {
    pub fn new(config: &Config, cache: CacheReader) -> Self {
        Self {
            cache,
            ping_interval: config.ping_interval,
            pong_timeout: config.pong_timeout,
            max_payload_bytes: config.max_payload_bytes,
        }
    }

    /// Runs the session to completion. Every exit path is logged with its
    /// close reason; a failed session never affects other peers.
    pub async fn serve(self, socket: TcpStream, drain: drain::Watch) {
        match self.run(socket, drain).await {
            close @ (Close::PeerClosed | Close::Shutdown | Close::CacheClosed) => {
                info!(reason = %close, "Peer session closed")
            }
            close => warn!(reason = %close, "Peer session closed"),
        }
    }

    async fn run(&self, mut socket: TcpStream, drain: drain::Watch) -> Close {
        // The peer speaks first.
        let hello = match time::timeout(HANDSHAKE_TIMEOUT, read_message(&mut socket)).await {
            Err(_) => return Close::HandshakeTimeout,
            Ok(Err(error)) => return error.into(),
            Ok(Ok(Message::ClientHello(hello))) => hello,
            Ok(Ok(msg)) => {
                return Close::Protocol(format!("expected client-hello, got {}", msg.kind()))
            }
        };
        info!(
            peer.hostname = %hello.hostname,
            peer.info = %hello.info,
            peer.version = %hello.version,
            peer.protocol_version = hello.protocol_version,
            "Peer connected",
        );

        let server_hello = Message::ServerHello(ServerHello {
            version: crate::VERSION.to_string(),
            protocol_version: PROTOCOL_VERSION,
        });
        if let Err(error) = write_message(&mut socket, &server_hello).await {
            return error.into();
        }

        // Snapshot and follower are taken under one lock: everything at or
        // before the snapshot index is in the snapshot, everything after it
        // arrives via the follower.
        let (snapshot, follower) = self.cache.subscribe();
        debug!(
            index = snapshot.index,
            entries = snapshot.updates.len(),
            "Sending snapshot",
        );

        let (read_half, write_half) = socket.into_split();
        let (tx, rx) = mpsc::channel(SEND_BUFFER_MESSAGES);
        let last_pong = Mutex::new(Instant::now());

        // The session's tasks race; the first to finish names the close
        // reason and the rest are dropped with it.
        tokio::select! {
            close = self.send(snapshot, follower, tx.clone()) => close,
            close = Self::write(write_half, rx) => close,
            close = self.ping(tx, &last_pong) => close,
            close = Self::receive(read_half, &last_pong) => close,
            _ = drain.signaled() => Close::Shutdown,
        }
    }

    /// Replays the snapshot, then forwards coalesced deltas, emitting a
    /// sync-status frame whenever the stream's status changes.
    async fn send(
        &self,
        snapshot: Snapshot,
        mut follower: Follower,
        tx: mpsc::Sender<Message>,
    ) -> Close {
        for updates in pack(&snapshot.updates, self.max_payload_bytes) {
            if tx.send(Message::Kvs(Kvs { updates })).await.is_err() {
                return Close::PeerClosed;
            }
        }
        if tx
            .send(Message::SyncStatus(snapshot.status))
            .await
            .is_err()
        {
            return Close::PeerClosed;
        }
        debug!("Snapshot complete");
        let mut last_status = snapshot.status;

        loop {
            let delta = match follower.next().await {
                Some(delta) => delta,
                None => return Close::CacheClosed,
            };
            trace!(
                index = delta.index,
                updates = delta.updates.len(),
                "Forwarding delta",
            );

            if delta.status != last_status {
                if tx.send(Message::SyncStatus(delta.status)).await.is_err() {
                    return Close::PeerClosed;
                }
                last_status = delta.status;
            }
            for updates in pack(&delta.updates, self.max_payload_bytes) {
                if tx.send(Message::Kvs(Kvs { updates })).await.is_err() {
                    return Close::PeerClosed;
                }
            }
        }
    }

    /// Sole owner of the socket's write half; the socket itself is the
    /// flow-control primitive.
    async fn write(mut io: OwnedWriteHalf, mut rx: mpsc::Receiver<Message>) -> Close {
        while let Some(msg) = rx.recv().await {
            trace!(kind = msg.kind(), "Sending");
            if let Err(error) = write_message(&mut io, &msg).await {
                return error.into();
            }
        }
        // The senders live as long as the session; the channel only closes
        // as it unwinds.
        Close::Shutdown
    }

    /// Emits pings on the interval and closes the session once the pong
    /// deadline passes. The deadline is armed from the last pong rather
    /// than sampled at ping ticks, so with the default timeout of two
    /// intervals the second unanswered ping is the last.
    async fn ping(&self, tx: mpsc::Sender<Message>, last_pong: &Mutex<Instant>) -> Close {
        let mut interval = time::interval(self.ping_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            let deadline = *last_pong.lock() + self.pong_timeout;
            tokio::select! {
                _ = interval.tick() => {
                    let ping = Ping {
                        timestamp_ms: unix_millis(),
                    };
                    if tx.send(Message::Ping(ping)).await.is_err() {
                        return Close::PeerClosed;
                    }
                }

                _ = time::sleep_until(deadline.into()) => {
                    let silence = last_pong.lock().elapsed();
                    if silence >= self.pong_timeout {
                        warn!(?silence, "No pong from peer");
                        return Close::PongTimeout;
                    }
                    // A pong landed while we slept; the next iteration
                    // re-arms the deadline from it.
                }
            }
        }
    }

    /// Only pongs are legal after the handshake.
    async fn receive(mut io: OwnedReadHalf, last_pong: &Mutex<Instant>) -> Close {
        loop {
            match read_message(&mut io).await {
                Ok(Message::Pong(Pong {
                    ping_timestamp_ms,
                    pong_timestamp_ms,
                })) => {
                    *last_pong.lock() = Instant::now();
                    trace!(ping_timestamp_ms, pong_timestamp_ms, "Pong");
                }
                Ok(msg) => {
                    return Close::Protocol(format!(
                        "unexpected {} after handshake",
                        msg.kind()
                    ))
                }
                Err(error) => return error.into(),
            }
        }
    }
}

// === impl Close ===

impl From<WireError> for Close {
    fn from(error: WireError) -> Self {
        match error {
            WireError::Eof => Close::PeerClosed,
            WireError::Io(error) => Close::Io(error),
            WireError::Protocol(msg) => Close::Protocol(msg),
        }
    }
}

// === helpers ===

/// Packs updates greedily up to the soft payload cap, flushing on the cap
/// or the end of the batch. A single update larger than the cap still
/// travels, alone: an update is never split across frames.
fn pack(
    updates: &[std::sync::Arc<SerializedUpdate>],
    max_bytes: usize,
) -> Vec<Vec<SerializedUpdate>> {
    let mut batches = Vec::new();
    let mut batch = Vec::new();
    let mut cost = 0;
    for update in updates {
        if !batch.is_empty() && cost + update.wire_cost() > max_bytes {
            batches.push(std::mem::take(&mut batch));
            cost = 0;
        }
        cost += update.wire_cost();
        batch.push((**update).clone());
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
