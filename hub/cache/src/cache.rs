use crate::follower::Follower;
use ahash::AHashMap as HashMap;
use fanout_core::{RawUpdate, SyncStatus, UpdateKind};
use fanout_proto::SerializedUpdate;
use parking_lot::{Mutex, RwLock};
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::watch;

/// One sealed batch of updates plus the sync status at the time it was
/// committed. Immutable once appended; indices are dense and strictly
/// increasing, starting at 1.
#[derive(Debug)]
pub(crate) struct Breadcrumb {
    pub(crate) index: u64,
    pub(crate) updates: Vec<Arc<SerializedUpdate>>,
    pub(crate) status: SyncStatus,
}

/// A live entry: the last update accepted for a key and the trail index at
/// which it was appended.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) update: Arc<SerializedUpdate>,
    #[allow(dead_code)]
    pub(crate) index: u64,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) entries: HashMap<String, Entry>,
    pub(crate) trail: VecDeque<Arc<Breadcrumb>>,
    pub(crate) latest: u64,
    pub(crate) status: SyncStatus,
}

/// Tracks each follower's last consumed index so the trail can be pruned
/// past the slowest one.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub(crate) positions: HashMap<u64, u64>,
    next_id: u64,
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) inner: RwLock<Inner>,
    pub(crate) followers: Mutex<Registry>,
}

/// The writer half of the cache, owned by the upstream driver task. All
/// mutation flows through it; everything else reads.
#[derive(Debug)]
pub struct Cache {
    shared: Arc<Shared>,
    publish: watch::Sender<u64>,

    /// Updates accumulated since the last commit, one per key.
    staged: HashMap<String, Arc<SerializedUpdate>>,
    staged_status: Option<SyncStatus>,
    status_dirty: bool,
}

/// A cheap handle for peer sessions: snapshot-and-follow joins and
/// index-based resumption.
#[derive(Clone, Debug)]
pub struct CacheReader {
    shared: Arc<Shared>,
    rx: watch::Receiver<u64>,
}

/// The set of live entries as of a single trail index.
#[derive(Debug)]
pub struct Snapshot {
    pub index: u64,
    pub status: SyncStatus,
    pub updates: Vec<Arc<SerializedUpdate>>,
}

// === impl Cache ===

impl Cache {
    pub fn new() -> (Cache, CacheReader) {
        let (publish, rx) = watch::channel(0);
        let shared = Arc::new(Shared {
            inner: RwLock::new(Inner {
                entries: HashMap::default(),
                trail: VecDeque::new(),
                latest: 0,
                status: SyncStatus::WaitForDatastore,
            }),
            followers: Mutex::new(Registry::default()),
        });
        let cache = Cache {
            shared: shared.clone(),
            publish,
            staged: HashMap::default(),
            staged_status: None,
            status_dirty: false,
        };
        (cache, CacheReader { shared, rx })
    }

    /// Ingests one raw update, staging its wire form for the next commit.
    ///
    /// Updates that would be no-ops for every peer are dropped here, before
    /// they cost anything downstream. Within a batch the last form per key
    /// wins; intermediate forms are never emitted.
    pub fn on_update(&mut self, update: &RawUpdate) {
        let mut update = match SerializedUpdate::from_raw(update) {
            Ok(update) => update,
            Err(error) => {
                tracing::error!(%error, "Bug: dropping update whose key cannot be serialized");
                return;
            }
        };

        let live = self
            .shared
            .inner
            .read()
            .entries
            .get(&update.key)
            .map(|e| e.update.clone());

        // A create for a key we already hold is a resync artifact; squash it
        // so peers don't see a false re-creation.
        if update.kind == UpdateKind::New && live.is_some() {
            update.kind = UpdateKind::Updated;
        }

        if update.kind == UpdateKind::Deleted && live.is_none() {
            // Either the key was never published, or it was created and
            // deleted within this batch; peers must see neither.
            if self.staged.remove(&update.key).is_none() {
                tracing::debug!(key = %update.key, "Dropping deletion of unknown key");
            }
            return;
        }

        if let Some(prev) = self.staged.get(&update.key) {
            if update.would_be_noop(prev) {
                tracing::trace!(key = %update.key, "Skipping duplicate of staged update");
                return;
            }
        }
        if let Some(prev) = &live {
            if update.would_be_noop(prev) {
                // The key is back at its already-published state; cancel any
                // staged intermediate along with this update.
                tracing::trace!(key = %update.key, "Skipping no-op update");
                self.staged.remove(&update.key);
                return;
            }
        }

        self.staged.insert(update.key.clone(), Arc::new(update));
    }

    /// Stages a status change for the next commit.
    ///
    /// A repeated status still marks the breadcrumb dirty: peers use the
    /// resulting empty commit as a punctuation point.
    pub fn on_status(&mut self, status: SyncStatus) {
        self.staged_status = Some(status);
        self.status_dirty = true;
    }

    /// Seals the staged batch into the next breadcrumb and publishes it.
    ///
    /// A no-op when nothing is staged. Snapshot reads and commits exclude
    /// each other, which is what makes the snapshot-then-tail handoff
    /// gap-free.
    pub fn commit(&mut self) {
        if self.staged.is_empty() && !self.status_dirty {
            return;
        }

        let updates: Vec<Arc<SerializedUpdate>> =
            self.staged.drain().map(|(_, update)| update).collect();

        let mut inner = self.shared.inner.write();
        let index = inner.latest + 1;
        if let Some(status) = self.staged_status.take() {
            inner.status = status;
        }
        let status = inner.status;

        for update in &updates {
            if update.kind == UpdateKind::Deleted {
                inner.entries.remove(&update.key);
            } else {
                inner.entries.insert(
                    update.key.clone(),
                    Entry {
                        update: update.clone(),
                        index,
                    },
                );
            }
        }

        inner.latest = index;
        inner.trail.push_back(Arc::new(Breadcrumb {
            index,
            updates,
            status,
        }));
        tracing::trace!(index, %status, "Committed breadcrumb");

        // Drop trail entries every follower has consumed. Registration
        // happens under the inner lock, so a joining peer cannot lose the
        // crumbs between its snapshot and its first delta.
        let floor = self
            .shared
            .followers
            .lock()
            .min_position()
            .unwrap_or(index);
        while inner.trail.front().map_or(false, |c| c.index <= floor) {
            inner.trail.pop_front();
        }
        drop(inner);

        self.status_dirty = false;
        let _ = self.publish.send(index);
    }
}

// === impl CacheReader ===

impl CacheReader {
    /// Atomically takes a snapshot and registers a follower that picks up
    /// strictly after it: every update at or before the snapshot index is in
    /// the snapshot, every later one arrives via the follower, with no gap
    /// and no duplication.
    pub fn subscribe(&self) -> (Snapshot, Follower) {
        let inner = self.shared.inner.read();
        let id = self.shared.followers.lock().register(inner.latest);
        let snapshot = Snapshot {
            index: inner.latest,
            status: inner.status,
            updates: inner.entries.values().map(|e| e.update.clone()).collect(),
        };
        let follower = Follower::new(self.shared.clone(), self.rx.clone(), id, inner.latest);
        (snapshot, follower)
    }

    /// Registers a follower at a known index, without a snapshot.
    ///
    /// The index must be current (obtained from [`CacheReader::subscribe`]
    /// or a follower's last delta); a point that precedes the retained trail
    /// is clamped forward with a warning.
    pub fn follow_from(&self, index: u64) -> Follower {
        let inner = self.shared.inner.read();
        let horizon = inner
            .trail
            .front()
            .map(|c| c.index - 1)
            .unwrap_or(inner.latest);
        let position = if index < horizon {
            tracing::warn!(
                index,
                horizon,
                "Follow point precedes the retained trail; starting at the horizon",
            );
            horizon
        } else {
            index
        };
        let id = self.shared.followers.lock().register(position);
        Follower::new(self.shared.clone(), self.rx.clone(), id, position)
    }
}

#[cfg(test)]
impl CacheReader {
    pub(crate) fn trail_len(&self) -> usize {
        self.shared.inner.read().trail.len()
    }
}

// === impl Registry ===

impl Registry {
    pub(crate) fn register(&mut self, position: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.positions.insert(id, position);
        id
    }

    pub(crate) fn min_position(&self) -> Option<u64> {
        self.positions.values().copied().min()
    }
}
