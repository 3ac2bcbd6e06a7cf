use super::*;
use fanout_core::{Key, RawUpdate, SyncStatus, UpdateKind};
use fanout_proto::SerializedUpdate;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::time;

fn policy(name: &str) -> Key {
    Key::Policy {
        namespace: "default".into(),
        name: name.into(),
    }
}

fn update(name: &str, value: serde_json::Value, revision: &str, kind: UpdateKind) -> RawUpdate {
    RawUpdate {
        key: policy(name),
        value: Some(value),
        revision: revision.into(),
        ttl: Duration::ZERO,
        kind,
    }
}

fn deletion(name: &str, revision: &str) -> RawUpdate {
    RawUpdate {
        key: policy(name),
        value: None,
        revision: revision.into(),
        ttl: Duration::ZERO,
        kind: UpdateKind::Deleted,
    }
}

async fn next_delta(follower: &mut Follower) -> Delta {
    time::timeout(Duration::from_secs(1), follower.next())
        .await
        .expect("timed out waiting for a delta")
        .expect("cache closed unexpectedly")
}

async fn assert_no_delta(follower: &mut Follower) {
    assert!(
        time::timeout(Duration::from_millis(100), follower.next())
            .await
            .is_err(),
        "expected no delta"
    );
}

/// Applies snapshot or delta updates as a key/value map, the way a peer
/// materializes the stream.
fn apply(map: &mut std::collections::HashMap<String, Vec<u8>>, updates: &[Arc<SerializedUpdate>]) {
    for u in updates {
        if u.kind == UpdateKind::Deleted {
            map.remove(&u.key);
        } else {
            map.insert(u.key.clone(), u.value.clone());
        }
    }
}

#[tokio::test]
async fn snapshot_then_tail_has_no_gap_or_duplication() {
    let (mut cache, reader) = Cache::new();

    cache.on_update(&update("a", json!({"order": 1}), "1", UpdateKind::New));
    cache.on_update(&update("b", json!({"order": 2}), "2", UpdateKind::New));
    cache.on_status(SyncStatus::InSync);
    cache.commit();

    let (snapshot, mut follower) = reader.subscribe();
    assert_eq!(snapshot.index, 1);
    assert_eq!(snapshot.status, SyncStatus::InSync);
    assert_eq!(snapshot.updates.len(), 2);

    // Updates committed after the subscription arrive via the tail only.
    cache.on_update(&update("c", json!({"order": 3}), "3", UpdateKind::New));
    cache.commit();

    let delta = next_delta(&mut follower).await;
    assert_eq!(delta.index, 2);
    assert_eq!(delta.updates.len(), 1);
    assert_eq!(delta.updates[0].key, "/policy/default/c");

    // Snapshot plus deltas reproduces the live map exactly.
    let mut materialized = std::collections::HashMap::new();
    apply(&mut materialized, &snapshot.updates);
    apply(&mut materialized, &delta.updates);
    let (fresh, _) = reader.subscribe();
    let mut live = std::collections::HashMap::new();
    apply(&mut live, &fresh.updates);
    assert_eq!(materialized, live);
}

#[tokio::test]
async fn identical_update_with_new_revision_is_dropped() {
    let (mut cache, reader) = Cache::new();

    cache.on_update(&update("a", json!({"order": 1}), "1", UpdateKind::New));
    cache.commit();

    let (snapshot, mut follower) = reader.subscribe();
    assert_eq!(snapshot.index, 1);

    // Same bytes, new revision: peers must not see it again.
    cache.on_update(&update("a", json!({"order": 1}), "7", UpdateKind::Updated));
    cache.commit();
    assert_no_delta(&mut follower).await;
}

#[tokio::test]
async fn changed_value_is_forwarded_once() {
    let (mut cache, reader) = Cache::new();

    cache.on_update(&update("a", json!({"order": 1}), "1", UpdateKind::New));
    cache.commit();
    let (_, mut follower) = reader.subscribe();

    cache.on_update(&update("a", json!({"order": 2}), "8", UpdateKind::Updated));
    cache.commit();

    let delta = next_delta(&mut follower).await;
    assert_eq!(delta.updates.len(), 1);
    assert_eq!(delta.updates[0].key, "/policy/default/a");
}

#[tokio::test]
async fn recreate_of_live_key_is_squashed_to_update() {
    let (mut cache, reader) = Cache::new();

    cache.on_update(&update("a", json!({"order": 1}), "1", UpdateKind::New));
    cache.commit();
    let (_, mut follower) = reader.subscribe();

    // A resync replays the key as a create. Identical bytes: dropped.
    cache.on_update(&update("a", json!({"order": 1}), "9", UpdateKind::New));
    cache.commit();
    assert_no_delta(&mut follower).await;

    // Different bytes: forwarded, but as an update, not a re-creation.
    cache.on_update(&update("a", json!({"order": 2}), "10", UpdateKind::New));
    cache.commit();
    let delta = next_delta(&mut follower).await;
    assert_eq!(delta.updates.len(), 1);
    assert_eq!(delta.updates[0].kind, UpdateKind::Updated);
}

#[tokio::test]
async fn deletion_of_unknown_key_is_dropped() {
    let (mut cache, reader) = Cache::new();

    cache.on_update(&deletion("ghost", "1"));
    cache.commit();

    let (snapshot, _) = reader.subscribe();
    assert_eq!(snapshot.index, 0, "nothing should have been committed");
}

#[tokio::test]
async fn last_form_wins_within_a_batch() {
    let (mut cache, reader) = Cache::new();
    let (_, mut follower) = reader.subscribe();

    cache.on_update(&update("a", json!({"order": 1}), "1", UpdateKind::New));
    cache.on_update(&update("a", json!({"order": 2}), "2", UpdateKind::Updated));
    cache.commit();

    let delta = next_delta(&mut follower).await;
    assert_eq!(delta.updates.len(), 1);
    assert_eq!(
        delta.updates[0].value,
        serde_json::to_vec(&json!({"order": 2})).unwrap()
    );
}

#[tokio::test]
async fn delete_then_identical_recreate_cancels_out() {
    let (mut cache, reader) = Cache::new();

    cache.on_update(&update("a", json!({"order": 1}), "1", UpdateKind::New));
    cache.commit();
    let (_, mut follower) = reader.subscribe();

    // Within one batch the key returns to its published state.
    cache.on_update(&deletion("a", "2"));
    cache.on_update(&update("a", json!({"order": 1}), "3", UpdateKind::New));
    cache.commit();
    assert_no_delta(&mut follower).await;

    // The live entry survives.
    let (snapshot, _) = reader.subscribe();
    assert_eq!(snapshot.updates.len(), 1);
}

#[tokio::test]
async fn stalled_follower_drains_one_update_per_key() {
    let (mut cache, reader) = Cache::new();
    let (_, mut follower) = reader.subscribe();

    // Five commits to one key and one to another while the follower sleeps.
    for revision in 1..=5u32 {
        cache.on_update(&update(
            "hot",
            json!({ "order": revision }),
            &revision.to_string(),
            UpdateKind::Updated,
        ));
        cache.commit();
    }
    cache.on_update(&update("cold", json!({"order": 0}), "6", UpdateKind::New));
    cache.commit();

    let delta = next_delta(&mut follower).await;
    assert_eq!(delta.index, 6);
    assert_eq!(delta.updates.len(), 2, "one update per key, however many commits");
    let hot = delta
        .updates
        .iter()
        .find(|u| u.key == "/policy/default/hot")
        .expect("hot key present");
    assert_eq!(hot.value, serde_json::to_vec(&json!({"order": 5})).unwrap());

    // Fully drained: nothing further pending.
    assert_no_delta(&mut follower).await;
}

#[tokio::test]
async fn deletion_survives_catch_up_coalescing() {
    let (mut cache, reader) = Cache::new();

    cache.on_update(&update("a", json!({"order": 1}), "1", UpdateKind::New));
    cache.commit();
    let (_, mut follower) = reader.subscribe();

    cache.on_update(&update("a", json!({"order": 2}), "2", UpdateKind::Updated));
    cache.commit();
    cache.on_update(&deletion("a", "3"));
    cache.commit();

    let delta = next_delta(&mut follower).await;
    assert_eq!(delta.updates.len(), 1);
    assert_eq!(delta.updates[0].kind, UpdateKind::Deleted);
}

#[tokio::test]
async fn repeated_status_still_punctuates() {
    let (mut cache, reader) = Cache::new();
    let (_, mut follower) = reader.subscribe();

    cache.on_status(SyncStatus::InSync);
    cache.commit();
    let first = next_delta(&mut follower).await;
    assert_eq!(first.status, SyncStatus::InSync);
    assert!(first.updates.is_empty());

    // The upstream re-reports the same status; peers still get the
    // punctuation commit.
    cache.on_status(SyncStatus::InSync);
    cache.commit();
    let second = next_delta(&mut follower).await;
    assert_eq!(second.status, SyncStatus::InSync);
    assert!(second.updates.is_empty());
}

#[tokio::test]
async fn status_can_regress_to_resync() {
    let (mut cache, reader) = Cache::new();
    let (_, mut follower) = reader.subscribe();

    cache.on_status(SyncStatus::InSync);
    cache.commit();
    assert_eq!(next_delta(&mut follower).await.status, SyncStatus::InSync);

    cache.on_status(SyncStatus::Resync);
    cache.commit();
    assert_eq!(next_delta(&mut follower).await.status, SyncStatus::Resync);
}

#[tokio::test]
async fn trail_is_pruned_once_followers_advance() {
    let (mut cache, reader) = Cache::new();
    let (_, mut follower) = reader.subscribe();

    for revision in 1..=8u32 {
        cache.on_update(&update(
            "a",
            json!({ "order": revision }),
            &revision.to_string(),
            UpdateKind::Updated,
        ));
        cache.commit();
    }
    // The stalled follower pins the whole range.
    assert_eq!(reader.trail_len(), 8);

    let _ = next_delta(&mut follower).await;
    cache.on_update(&update("a", json!({"order": 9}), "9", UpdateKind::Updated));
    cache.commit();
    // Everything the follower consumed is gone.
    assert_eq!(reader.trail_len(), 1);
}

#[tokio::test]
async fn follower_ends_when_the_cache_shuts_down() {
    let (cache, reader) = Cache::new();
    let (_, mut follower) = reader.subscribe();

    drop(cache);
    let ended = time::timeout(Duration::from_secs(1), follower.next())
        .await
        .expect("timed out");
    assert!(ended.is_none());
}

#[tokio::test]
async fn follow_from_zero_replays_everything_retained() {
    let (mut cache, reader) = Cache::new();
    let mut follower = reader.follow_from(0);

    cache.on_update(&update("a", json!({"order": 1}), "1", UpdateKind::New));
    cache.commit();
    cache.on_update(&update("b", json!({"order": 2}), "2", UpdateKind::New));
    cache.commit();

    let delta = next_delta(&mut follower).await;
    assert_eq!(delta.index, 2);
    assert_eq!(delta.updates.len(), 2);
}
