use models::SourceDescriptor;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// BlobStore serves content-addressed archive bytes. The store itself
/// (filesystem, object storage, ...) is external; the core only reads.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Opens a stream of archive bytes for the given key.
    async fn get(&self, key: &str) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// SourceRef binds a source descriptor to blob storage, deferring any
/// fetch until a handler actually asks for the reader. Handlers that
/// skip their sources never touch the store.
#[derive(Clone)]
pub struct SourceRef {
    descriptor: SourceDescriptor,
    blobs: Arc<dyn BlobStore>,
}

impl SourceRef {
    pub fn new(descriptor: SourceDescriptor, blobs: Arc<dyn BlobStore>) -> Self {
        Self { descriptor, blobs }
    }

    /// Hex digest of the archive, which is also its storage key.
    pub fn digest(&self) -> &str {
        &self.descriptor.digest
    }

    /// Size of the archive in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.byte_len
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// Opens the archive byte stream.
    pub async fn reader(&self) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>> {
        self.blobs.get(&self.descriptor.digest).await
    }
}

impl std::fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SourceRef")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
