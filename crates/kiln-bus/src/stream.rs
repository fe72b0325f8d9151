use std::collections::HashMap;

use async_trait::async_trait;
use kiln_domain::{OrgId, ResourceKind};
use tokio::sync::{broadcast, Mutex};

use crate::error::StreamError;

/// Emitted on the live stream to signal orderly end-of-logs; clients use it
/// to distinguish completion from an abrupt disconnect.
pub const STREAM_COMPLETE: &str = "<<STREAM_COMPLETE>>";

const CHANNEL_CAPACITY: usize = 1024;

/// Key of the per-resource live log stream on the streaming store.
pub fn stream_key(kind: ResourceKind, org_id: &OrgId, name: &str) -> String {
    let kind = match kind {
        ResourceKind::ImageBuild => "imagebuild",
        ResourceKind::ImageExport => "imageexport",
    };
    format!("{kind}:logs:{org_id}:{name}")
}

/// Append-only ordered log, multi-reader, single-writer per key. Bytes are
/// visible to concurrent readers immediately; durable archival is the status
/// updater's concern, not the stream's.
#[async_trait]
pub trait LogStream: Send + Sync + 'static {
    async fn append(&self, key: &str, chunk: Vec<u8>) -> Result<(), StreamError>;

    /// Snapshot of everything appended so far. Unknown keys read as empty.
    async fn read(&self, key: &str) -> Result<Vec<Vec<u8>>, StreamError>;

    /// Live subscription; delivery starts with chunks appended after the call.
    async fn subscribe(&self, key: &str) -> Result<broadcast::Receiver<Vec<u8>>, StreamError>;

    /// Orderly close: appends the [`STREAM_COMPLETE`] sentinel.
    async fn close(&self, key: &str) -> Result<(), StreamError>;
}

#[derive(Default)]
struct Channel {
    backlog: Vec<Vec<u8>>,
    tx: Option<broadcast::Sender<Vec<u8>>>,
}

impl Channel {
    fn sender(&mut self) -> &broadcast::Sender<Vec<u8>> {
        self.tx.get_or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
    }
}

/// In-process implementation of [`LogStream`].
#[derive(Default)]
pub struct InMemoryLogStream {
    channels: Mutex<HashMap<String, Channel>>,
}

impl InMemoryLogStream {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStream for InMemoryLogStream {
    async fn append(&self, key: &str, chunk: Vec<u8>) -> Result<(), StreamError> {
        let mut channels = self.channels.lock().await;
        let channel = channels.entry(key.to_string()).or_default();
        channel.backlog.push(chunk.clone());
        // A send error only means no live readers right now.
        let _ = channel.sender().send(chunk);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<Vec<u8>>, StreamError> {
        let channels = self.channels.lock().await;
        Ok(channels.get(key).map(|c| c.backlog.clone()).unwrap_or_default())
    }

    async fn subscribe(&self, key: &str) -> Result<broadcast::Receiver<Vec<u8>>, StreamError> {
        let mut channels = self.channels.lock().await;
        let channel = channels.entry(key.to_string()).or_default();
        Ok(channel.sender().subscribe())
    }

    async fn close(&self, key: &str) -> Result<(), StreamError> {
        self.append(key, format!("{STREAM_COMPLETE}\n").into_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backlog_preserves_order() {
        let stream = InMemoryLogStream::new();
        stream.append("k", b"one\n".to_vec()).await.unwrap();
        stream.append("k", b"two\n".to_vec()).await.unwrap();
        let backlog = stream.read("k").await.unwrap();
        assert_eq!(backlog, vec![b"one\n".to_vec(), b"two\n".to_vec()]);
    }

    #[tokio::test]
    async fn unknown_key_reads_empty() {
        let stream = InMemoryLogStream::new();
        assert!(stream.read("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_appends_after_subscribe() {
        let stream = InMemoryLogStream::new();
        stream.append("k", b"before\n".to_vec()).await.unwrap();
        let mut rx = stream.subscribe("k").await.unwrap();
        stream.append("k", b"after\n".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"after\n".to_vec());
    }

    #[tokio::test]
    async fn close_appends_the_sentinel() {
        let stream = InMemoryLogStream::new();
        stream.append("k", b"done\n".to_vec()).await.unwrap();
        stream.close("k").await.unwrap();
        let backlog = stream.read("k").await.unwrap();
        let tail = String::from_utf8(backlog.last().unwrap().clone()).unwrap();
        assert!(tail.contains(STREAM_COMPLETE));
    }

    #[test]
    fn stream_keys_are_org_scoped() {
        let org = OrgId::nil();
        assert_eq!(
            stream_key(ResourceKind::ImageBuild, &org, "b1"),
            format!("imagebuild:logs:{org}:b1")
        );
        assert_eq!(
            stream_key(ResourceKind::ImageExport, &org, "e1"),
            format!("imageexport:logs:{org}:e1")
        );
    }
}
