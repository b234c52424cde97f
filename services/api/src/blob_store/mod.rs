//! Object-store connector.
//!
//! Every backend exposes the same three operations with the same failure
//! contract: `put` and `delete` answer `true`/`false`, `get` answers
//! `Some(stream)`/`None`. Backend errors are logged and swallowed here; no
//! retry happens at this layer.

mod gcs;
mod memory;
mod supabase;

pub use gcs::GcsStore;
pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

use crate::config::{StorageBackend, StorageConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::io;
use std::sync::Arc;

/// Object body, readable exactly once
pub type BlobStream = BoxStream<'static, io::Result<Bytes>>;

/// A single object to be written
pub struct PutObject {
    /// Storage key, unique within the bucket
    pub key: String,
    /// Object content
    pub body: BlobStream,
    /// MIME type recorded with the object
    pub content_type: String,
    /// Declared length; forwarded to the backend without being checked
    pub content_length: u64,
}

impl std::fmt::Debug for PutObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutObject")
            .field("key", &self.key)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Uniform put/get/delete contract over a blob store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Create or overwrite the object at `object.key`.
    ///
    /// Returns `false` when the write did not happen, for any reason.
    async fn put(&self, object: PutObject, auth_token: Option<&str>) -> bool;

    /// Open the object at `key`. Missing objects and retrieval errors both
    /// yield `None`.
    async fn get(&self, key: &str, auth_token: Option<&str>) -> Option<BlobStream>;

    /// Remove the object at `key`. Removing a missing object succeeds.
    async fn delete(&self, key: &str, auth_token: Option<&str>) -> bool;
}

/// Build the configured backend
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.backend {
        StorageBackend::Gcs => Arc::new(GcsStore::new(config).await),
        StorageBackend::Supabase => Arc::new(
            SupabaseStore::new(config).context("Failed to initialize Supabase Storage client")?,
        ),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    };

    Ok(store)
}

/// Wrap an in-memory buffer as a single-chunk body
pub fn stream_from_bytes(data: Bytes) -> BlobStream {
    stream::once(async move { Ok(data) }).boxed()
}

/// Drain a body into one contiguous buffer
pub async fn collect_body(body: BlobStream) -> io::Result<Bytes> {
    let buffer = body
        .try_fold(BytesMut::new(), |mut buffer, chunk| async move {
            buffer.extend_from_slice(&chunk);
            Ok(buffer)
        })
        .await?;

    Ok(buffer.freeze())
}

pub(crate) fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
}
