#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The in-memory, revision-stamped snapshot of the datastore.
//!
//! This crate handles all of the projection logic without dealing with the
//! specifics of sockets or sessions. The upstream driver owns the single
//! [`Cache`] writer: it ingests raw updates, converts them to wire form
//! once, deduplicates them against previous state, and seals each batch into
//! an immutable, densely indexed breadcrumb. Peer sessions hold a
//! [`CacheReader`]: joining yields a self-consistent snapshot plus a
//! [`Follower`] that picks up strictly after it, and a follower that falls
//! behind drains at most one update per key no matter how many commits it
//! missed.

mod cache;
mod follower;

#[cfg(test)]
mod tests;

pub use self::cache::{Cache, CacheReader, Snapshot};
pub use self::follower::{Delta, Follower};
