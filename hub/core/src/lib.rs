#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Datastore model shared by the hub and its peers.
//!
//! The upstream datastore holds network-policy and endpoint objects keyed by
//! path-like strings. The hub parses keys (it routes by them) but treats
//! values as opaque, pre-encoded byte payloads.

mod key;
mod update;
mod upstream;

pub use self::key::{Key, KeyError};
pub use self::update::{RawUpdate, SyncStatus, UpdateKind};
pub use self::upstream::{UpstreamClient, UpstreamEvent, UpstreamStream};
