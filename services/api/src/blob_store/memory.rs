use super::{collect_body, is_valid_key, stream_from_bytes, BlobStore, BlobStream, PutObject};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, error};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

/// Process-local blob store for tests and single-node development
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Content type recorded for `key`
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .get(key)
            .map(|object| object.content_type.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, object: PutObject, _auth_token: Option<&str>) -> bool {
        if !is_valid_key(&object.key) {
            return false;
        }

        let data = match collect_body(object.body).await {
            Ok(data) => data,
            Err(e) => {
                error!(key = %object.key, error = %e, "Failed to read object body");
                return false;
            }
        };

        debug!(key = %object.key, size_bytes = data.len(), "Storing object in memory");

        self.objects.write().insert(
            object.key,
            StoredObject {
                data,
                content_type: object.content_type,
            },
        );
        true
    }

    async fn get(&self, key: &str, _auth_token: Option<&str>) -> Option<BlobStream> {
        let data = self.objects.read().get(key).map(|object| object.data.clone())?;
        Some(stream_from_bytes(data))
    }

    async fn delete(&self, key: &str, _auth_token: Option<&str>) -> bool {
        if !is_valid_key(key) {
            return false;
        }

        self.objects.write().remove(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(key: &str, data: &'static [u8]) -> PutObject {
        PutObject {
            key: key.to_string(),
            body: stream_from_bytes(Bytes::from_static(data)),
            content_type: "image/jpeg".to_string(),
            content_length: data.len() as u64,
        }
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let store = MemoryStore::new();
        assert!(store.put(object("a.jpeg", b"pixels"), None).await);

        let body = store.get("a.jpeg", None).await.expect("object should exist");
        assert_eq!(&collect_body(body).await.unwrap()[..], b"pixels");
        assert_eq!(store.content_type("a.jpeg").as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_key() {
        let store = MemoryStore::new();
        assert!(store.put(object("a.jpeg", b"first"), None).await);
        assert!(store.put(object("a.jpeg", b"second"), None).await);

        let body = store.get("a.jpeg", None).await.unwrap();
        assert_eq!(&collect_body(body).await.unwrap()[..], b"second");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_key_succeeds() {
        let store = MemoryStore::new();
        assert!(store.delete("never-written.png", None).await);
    }

    #[tokio::test]
    async fn test_delete_then_get_returns_none() {
        let store = MemoryStore::new();
        store.put(object("a.jpeg", b"pixels"), None).await;

        assert!(store.delete("a.jpeg", None).await);
        assert!(store.get("a.jpeg", None).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let store = MemoryStore::new();
        assert!(!store.put(object("", b"pixels"), None).await);
        assert!(store.is_empty());
    }
}
