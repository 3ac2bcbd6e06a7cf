use crate::Key;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// The kind of mutation an update describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    /// The key was not previously present.
    New,
    /// The key was previously present with a different value.
    Updated,
    /// The key was removed.
    Deleted,
}

/// Whether the upstream watch currently reflects a complete view of the
/// datastore.
///
/// Transitions follow the upstream signal and may move in either direction;
/// an `InSync` may be followed by `Resync` if the upstream falls behind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// The upstream watch has not yet been established.
    WaitForDatastore,
    /// The upstream is replaying its state; the view may be incomplete.
    Resync,
    /// The view is complete and live.
    InSync,
}

/// One parsed mutation from the upstream watch.
#[derive(Clone, Debug, PartialEq)]
pub struct RawUpdate {
    pub key: Key,

    /// The object stored under the key. `None` means deletion.
    pub value: Option<serde_json::Value>,

    /// Opaque revision token assigned by the datastore.
    pub revision: String,

    /// Time-to-live; zero means no expiry.
    pub ttl: Duration,

    pub kind: UpdateKind,
}

// === impl SyncStatus ===

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::WaitForDatastore => "wait-for-datastore".fmt(f),
            SyncStatus::Resync => "resync".fmt(f),
            SyncStatus::InSync => "in-sync".fmt(f),
        }
    }
}
