use crate::{RawUpdate, SyncStatus};
use anyhow::Result;
use futures::Stream;
use std::pin::Pin;

/// One message from the upstream watch.
#[derive(Clone, Debug, PartialEq)]
pub enum UpstreamEvent {
    /// The upstream's view of its own synchronization state changed.
    Status(SyncStatus),

    /// A batch of mutations, in datastore commit order.
    Updates(Vec<RawUpdate>),
}

pub type UpstreamStream = Pin<Box<dyn Stream<Item = UpstreamEvent> + Send>>;

/// Adapts a datastore's native watch to the hub's internal update stream.
///
/// The stream ends (or `watch` fails) when the upstream watch terminates;
/// the caller is expected to re-establish it with backoff.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn watch(&self) -> Result<UpstreamStream>;
}
