use std::str::FromStr;

/// A parsed datastore key.
///
/// Keys are exchanged on the wire in their canonical path encoding (see
/// [`Key::to_path`]); the hub routes by the path string and never inspects
/// the value stored under it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// A network policy: `/policy/<namespace>/<name>`.
    Policy { namespace: String, name: String },

    /// A policy profile: `/profile/<name>`.
    Profile { name: String },

    /// A workload endpoint: `/endpoint/<host>/<workload>/<name>`.
    Endpoint {
        host: String,
        workload: String,
        name: String,
    },

    /// Per-host configuration: `/host/<host>/config/<name>`.
    HostConfig { host: String, name: String },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key has an empty path segment")]
    EmptySegment,

    #[error("key segment contains a path separator: {0:?}")]
    InvalidSegment(String),

    #[error("unrecognized key path: {0:?}")]
    Unrecognized(String),
}

// === impl Key ===

impl Key {
    /// Encodes the key as its canonical datastore path.
    ///
    /// Fails only when a segment is empty or itself contains a separator;
    /// such a key cannot have come from the datastore.
    pub fn to_path(&self) -> Result<String, KeyError> {
        let segments: Vec<&str> = match self {
            Key::Policy { namespace, name } => vec!["policy", namespace, name],
            Key::Profile { name } => vec!["profile", name],
            Key::Endpoint {
                host,
                workload,
                name,
            } => vec!["endpoint", host, workload, name],
            Key::HostConfig { host, name } => vec!["host", host, "config", name],
        };

        let mut path = String::new();
        for segment in segments {
            if segment.is_empty() {
                return Err(KeyError::EmptySegment);
            }
            if segment.contains('/') {
                return Err(KeyError::InvalidSegment(segment.to_string()));
            }
            path.push('/');
            path.push_str(segment);
        }
        Ok(path)
    }

    /// Parses a canonical datastore path. Inverse of [`Key::to_path`].
    pub fn parse_path(path: &str) -> Result<Self, KeyError> {
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| KeyError::Unrecognized(path.to_string()))?;

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(KeyError::EmptySegment);
        }

        match segments.as_slice() {
            ["policy", namespace, name] => Ok(Key::Policy {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            ["profile", name] => Ok(Key::Profile {
                name: name.to_string(),
            }),
            ["endpoint", host, workload, name] => Ok(Key::Endpoint {
                host: host.to_string(),
                workload: workload.to_string(),
                name: name.to_string(),
            }),
            ["host", host, "config", name] => Ok(Key::HostConfig {
                host: host.to_string(),
                name: name.to_string(),
            }),
            _ => Err(KeyError::Unrecognized(path.to_string())),
        }
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::parse_path(s)
    }
}
