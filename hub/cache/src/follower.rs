use crate::cache::Shared;
use ahash::AHashMap as HashMap;
use fanout_core::SyncStatus;
use fanout_proto::SerializedUpdate;
use std::{collections::hash_map::Entry, sync::Arc};
use tokio::sync::watch;

/// A lazy, restartable cursor over the breadcrumb trail.
///
/// Followers hold an index, not a pointer: each call to [`Follower::next`]
/// reads whatever immutable breadcrumbs have accumulated past the cursor
/// and coalesces them into one delta. Dropping a follower releases its
/// claim on the trail.
#[derive(Debug)]
pub struct Follower {
    shared: Arc<Shared>,
    rx: watch::Receiver<u64>,
    id: u64,
    position: u64,
}

/// Everything committed since the previous delta, coalesced so that each
/// key appears at most once.
#[derive(Debug)]
pub struct Delta {
    /// The trail index this delta brings the follower up to.
    pub index: u64,
    pub updates: Vec<Arc<SerializedUpdate>>,
    /// The sync status as of `index`.
    pub status: SyncStatus,
}

// === impl Follower ===

impl Follower {
    pub(crate) fn new(shared: Arc<Shared>, rx: watch::Receiver<u64>, id: u64, position: u64) -> Self {
        Self {
            shared,
            rx,
            id,
            position,
        }
    }

    /// Waits until a breadcrumb with an index past the cursor exists, then
    /// yields all pending breadcrumbs as one coalesced delta.
    ///
    /// Returns `None` only when the cache has shut down.
    pub async fn next(&mut self) -> Option<Delta> {
        loop {
            let latest = *self.rx.borrow_and_update();
            if latest > self.position {
                return Some(self.collect(latest));
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Collects the trail range `(position, upto]`, keeping only the last
    /// form of each key. This is the catch-up re-deduplication: however many
    /// commits a stalled peer missed, it drains at most one update per key.
    fn collect(&mut self, upto: u64) -> Delta {
        let inner = self.shared.inner.read();

        let mut updates: Vec<Arc<SerializedUpdate>> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::default();
        let mut status = inner.status;

        // The trail is dense, so the cursor's successor sits at a fixed
        // offset from the front. Our registered position pins everything
        // past it against pruning.
        let front = inner.trail.front().map(|c| c.index).unwrap_or(upto + 1);
        debug_assert!(front <= self.position + 1, "trail pruned past a follower");
        let start = (self.position + 1).saturating_sub(front) as usize;

        for crumb in inner.trail.iter().skip(start) {
            if crumb.index > upto {
                break;
            }
            status = crumb.status;
            for update in &crumb.updates {
                match by_key.entry(update.key.clone()) {
                    Entry::Occupied(slot) => updates[*slot.get()] = update.clone(),
                    Entry::Vacant(slot) => {
                        slot.insert(updates.len());
                        updates.push(update.clone());
                    }
                }
            }
        }
        drop(inner);

        self.position = upto;
        self.shared.followers.lock().positions.insert(self.id, upto);

        Delta {
            index: upto,
            updates,
            status,
        }
    }
}

impl Drop for Follower {
    fn drop(&mut self) {
        self.shared.followers.lock().positions.remove(&self.id);
    }
}
