#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The fan-out hub: one upstream datastore watch, many downstream peers.
//!
//! The hub drains the upstream watch into a shared [`fanout_cache::Cache`]
//! and multiplexes the resulting snapshot-plus-deltas stream out to every
//! connected peer over the [`fanout_proto`] wire protocol.

pub mod admin;
mod args;
pub mod connection;
pub mod server;
pub mod upstream;

pub use self::args::{Args, Config};

/// The hub's build version, advertised in the handshake.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
