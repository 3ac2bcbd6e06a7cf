#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The wire protocol spoken between the hub and its peers.
//!
//! A peer connects over TCP and initiates a synchronous handshake: it sends
//! a [`ClientHello`], and the hub answers with a [`ServerHello`]. The hub
//! then streams [`Message::Kvs`] frames amounting to a complete snapshot of
//! the datastore, followed by one [`Message::SyncStatus`] carrying its
//! current status. After that, further `Kvs` and `SyncStatus` frames flow as
//! the upstream changes, and the hub probes liveness with [`Message::Ping`],
//! which the peer must answer promptly with [`Message::Pong`].
//!
//! ```text
//! peer                      hub
//!  | connect                 |
//!  |------------------------>|
//!  | ClientHello             |
//!  |------------------------>|
//!  |             ServerHello |
//!  |<------------------------|
//!  |                 Kvs * n |
//!  |<------------------------|
//!  |      SyncStatus(InSync) |
//!  |<------------------------|
//!  |                    Ping |
//!  |<------------------------|
//!  | Pong                    |
//!  |------------------------>|
//!  |                 Kvs * n |
//!  |<------------------------|
//! ```
//!
//! Every frame is a length-prefixed envelope wrapping exactly one
//! [`Message`]; the envelope's tag makes unknown payload kinds an explicit
//! decode error rather than a silent drop. Key/value payloads travel as
//! [`SerializedUpdate`]s whose value bytes carry the datastore's own
//! encoding. The hub serializes each value once and fans the same bytes out
//! to every peer, and added object fields simply decode to their defaults on
//! an older reader, so mixed hub/peer versions interoperate. New message
//! kinds, by contrast, must be gated on the `protocol_version` exchanged in
//! the handshake.

mod codec;
mod message;
mod update;

pub use self::codec::{read_message, write_message, WireError, MAX_FRAME_LEN};
pub use self::message::{ClientHello, Kvs, Message, Ping, Pong, ServerHello, PROTOCOL_VERSION};
pub use self::update::{BadKey, SerializedUpdate};

/// The default port peers dial.
pub const DEFAULT_PORT: u16 = 5473;
