use crate::SerializedUpdate;
use fanout_core::SyncStatus;
use serde::{Deserialize, Serialize};

/// The protocol version both sides advertise during the handshake.
///
/// New unsolicited message kinds must only be sent when the other side's
/// advertised version permits them.
pub const PROTOCOL_VERSION: u32 = 1;

/// One protocol message; the envelope's payload.
///
/// The variant tag is the envelope's kind tag on the wire: a decoder built
/// against an older schema either decodes a known payload or fails with a
/// protocol error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    SyncStatus(SyncStatus),
    Ping(Ping),
    Pong(Pong),
    Kvs(Kvs),
}

/// First frame from the peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    pub hostname: String,

    /// Free-form description of the peer (process name, build info).
    pub info: String,

    /// The peer's build version string.
    pub version: String,

    pub protocol_version: u32,
}

/// First frame from the hub, answering a `ClientHello`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    pub version: String,
    pub protocol_version: u32,
}

/// Hub-initiated liveness probe.
///
/// The timestamp is an opaque wall-clock value in milliseconds; it exists so
/// the hub can correlate pongs even with multiple pings in flight. Liveness
/// timing itself uses local monotonic clocks on each side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp_ms: u64,
}

/// Peer reply to a [`Ping`]; echoes the originating timestamp.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub ping_timestamp_ms: u64,
    pub pong_timestamp_ms: u64,
}

/// A batch of serialized updates: snapshot entries or subsequent deltas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kvs {
    pub updates: Vec<SerializedUpdate>,
}

// === impl Message ===

impl Message {
    /// The payload kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ClientHello(_) => "client-hello",
            Message::ServerHello(_) => "server-hello",
            Message::SyncStatus(_) => "sync-status",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Kvs(_) => "kvs",
        }
    }
}
