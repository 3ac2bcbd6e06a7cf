use fanout_core::{Key, KeyError, RawUpdate, UpdateKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The canonical wire form of one key/value mutation.
///
/// The key is the datastore path encoding; the value carries the
/// datastore's own serialization, untouched by the hub. An empty value
/// distinguishes deletion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedUpdate {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: String,
    pub ttl: Duration,
    pub kind: UpdateKind,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unable to parse key: {0:?}")]
pub struct BadKey(pub String);

// === impl SerializedUpdate ===

impl SerializedUpdate {
    /// Projects a parsed upstream update to wire form.
    ///
    /// A key that fails to canonicalize was generated by the upstream
    /// watcher and is surfaced as a bug. A value that fails to serialize
    /// cannot be sent to any peer, so it is downgraded to a synthetic
    /// deletion, the safest loss of information.
    pub fn from_raw(update: &RawUpdate) -> Result<Self, KeyError> {
        let key = update.key.to_path()?;

        let value = match &update.value {
            // A deletion carries no value even if the upstream attached one.
            _ if update.kind == UpdateKind::Deleted => Vec::new(),
            None => Vec::new(),
            Some(value) => match serde_json::to_vec(value) {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::error!(
                        %error,
                        %key,
                        "Bug: failed to serialize value; passing through as a deletion",
                    );
                    return Ok(Self {
                        key,
                        value: Vec::new(),
                        revision: update.revision.clone(),
                        ttl: update.ttl,
                        kind: UpdateKind::Deleted,
                    });
                }
            },
        };

        Ok(Self {
            key,
            value,
            revision: update.revision.clone(),
            ttl: update.ttl,
            kind: update.kind,
        })
    }

    /// Reconstructs the parsed form. Inverse of [`SerializedUpdate::from_raw`].
    ///
    /// An unparseable key is fatal for this one update; the caller drops it
    /// and keeps the connection. An unparseable value is delivered as a
    /// deletion-shaped `None` with a diagnostic, since the peer can at least
    /// stop acting on stale state for the key.
    pub fn to_raw(&self) -> Result<RawUpdate, BadKey> {
        let key = Key::parse_path(&self.key).map_err(|error| {
            tracing::error!(key = %self.key, %error, "Bug: cannot parse key");
            BadKey(self.key.clone())
        })?;

        let value = if self.value.is_empty() {
            None
        } else {
            match serde_json::from_slice(&self.value) {
                Ok(value) => Some(value),
                Err(error) => {
                    tracing::warn!(key = %self.key, %error, "Failed to parse value");
                    None
                }
            }
        };

        Ok(RawUpdate {
            key,
            value,
            revision: self.revision.clone(),
            ttl: self.ttl,
            kind: self.kind,
        })
    }

    /// Returns true if sending this update after `previous` would be a no-op
    /// for the receiving peer.
    ///
    /// Revisions are ignored, and a previous create is compared as an
    /// update: squashing an update to a newly created key is fine as long as
    /// the value hasn't changed.
    pub fn would_be_noop(&self, previous: &SerializedUpdate) -> bool {
        let previous_kind = match previous.kind {
            UpdateKind::New => UpdateKind::Updated,
            kind => kind,
        };

        self.kind == previous_kind
            && self.key == previous.key
            && self.value == previous.value
            && self.ttl == previous.ttl
    }

    /// Approximate on-wire size, used to pack `Kvs` frames up to the
    /// configured payload cap.
    pub fn wire_cost(&self) -> usize {
        // Three length prefixes, the ttl, and the kind tag round up to 32.
        self.key.len() + self.value.len() + self.revision.len() + 32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(value: &[u8], revision: &str, kind: UpdateKind) -> SerializedUpdate {
        SerializedUpdate {
            key: "/policy/default/allow-dns".to_string(),
            value: value.to_vec(),
            revision: revision.to_string(),
            ttl: Duration::ZERO,
            kind,
        }
    }

    #[test]
    fn noop_ignores_revision() {
        let a = update(b"{}", "10", UpdateKind::Updated);
        let b = update(b"{}", "11", UpdateKind::Updated);
        assert!(a.would_be_noop(&a));
        assert!(b.would_be_noop(&a));
    }

    #[test]
    fn noop_squashes_create_then_identical_update() {
        let created = update(b"{}", "10", UpdateKind::New);
        let updated = update(b"{}", "11", UpdateKind::Updated);
        assert!(updated.would_be_noop(&created));
        // The reverse direction is not a no-op: a create after an update
        // signals a re-creation.
        assert!(!created.would_be_noop(&updated));
    }

    #[test]
    fn changed_value_is_not_a_noop() {
        let a = update(b"{\"order\":1}", "10", UpdateKind::Updated);
        let b = update(b"{\"order\":2}", "11", UpdateKind::Updated);
        assert!(!b.would_be_noop(&a));
    }

    #[test]
    fn changed_ttl_is_not_a_noop() {
        let a = update(b"{}", "10", UpdateKind::Updated);
        let mut b = a.clone();
        b.ttl = Duration::from_secs(30);
        assert!(!b.would_be_noop(&a));
    }

    #[test]
    fn deletion_is_not_a_noop_against_a_value() {
        let a = update(b"{}", "10", UpdateKind::Updated);
        let d = update(b"", "11", UpdateKind::Deleted);
        assert!(!d.would_be_noop(&a));
    }

    #[test]
    fn round_trips_through_raw_form() {
        // Serialization stability: what the cache produces must survive a
        // peer-side parse and re-serialization byte-for-byte.
        let raw = RawUpdate {
            key: Key::Policy {
                namespace: "default".into(),
                name: "allow-dns".into(),
            },
            value: Some(json!({"order": 10, "selector": "all()"})),
            revision: "1234".into(),
            ttl: Duration::from_secs(60),
            kind: UpdateKind::Updated,
        };
        let wire = SerializedUpdate::from_raw(&raw).expect("must serialize");
        let parsed = wire.to_raw().expect("must parse");
        let rewire = SerializedUpdate::from_raw(&parsed).expect("must re-serialize");
        assert_eq!(wire, rewire);
    }

    #[test]
    fn deletion_round_trips() {
        let raw = RawUpdate {
            key: Key::Profile {
                name: "kns.default".into(),
            },
            value: None,
            revision: "99".into(),
            ttl: Duration::ZERO,
            kind: UpdateKind::Deleted,
        };
        let wire = SerializedUpdate::from_raw(&raw).expect("must serialize");
        assert!(wire.value.is_empty());
        assert_eq!(wire.to_raw().expect("must parse"), raw);
    }

    #[test]
    fn unparseable_key_is_fatal_for_the_update() {
        let wire = SerializedUpdate {
            key: "/garbage".into(),
            value: Vec::new(),
            revision: "1".into(),
            ttl: Duration::ZERO,
            kind: UpdateKind::Deleted,
        };
        assert_eq!(wire.to_raw(), Err(BadKey("/garbage".into())));
    }

    #[test]
    fn unparseable_value_is_delivered_as_none() {
        let wire = SerializedUpdate {
            key: "/profile/kns.default".into(),
            value: b"not json".to_vec(),
            revision: "1".into(),
            ttl: Duration::ZERO,
            kind: UpdateKind::Updated,
        };
        let raw = wire.to_raw().expect("key parses");
        assert_eq!(raw.value, None);
        assert_eq!(raw.kind, UpdateKind::Updated);
    }
}
