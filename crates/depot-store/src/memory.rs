//! In-process bucket used for local runs and tests.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::RwLock;
use tracing::debug;

use crate::{ObjectBody, ObjectStore, StorageError, UploadResult};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
}

/// Bucket held entirely in memory. Clones share the same contents.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.objects.write().remove(key).is_some()
    }

    fn url_for(&self, key: &str) -> String {
        format!("memory://{}/{}", self.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket_name(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        file_name: &str,
        file_data: Bytes,
        content_type: Option<&str>,
    ) -> Result<UploadResult, StorageError> {
        debug!(bucket = %self.bucket, key = file_name, size = file_data.len(), "memory put");
        self.objects.write().insert(
            file_name.to_string(),
            StoredObject {
                data: file_data,
                content_type: content_type.map(str::to_owned),
            },
        );

        Ok(UploadResult {
            bucket_name: self.bucket.clone(),
            file_name: file_name.to_string(),
            url: self.url_for(file_name),
        })
    }

    async fn get_object(&self, file_path: &str) -> Result<ObjectBody, StorageError> {
        let object = self
            .objects
            .read()
            .get(file_path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(file_path.to_string()))?;

        Ok(ObjectBody {
            content_type: object.content_type,
            content_length: Some(object.data.len() as u64),
            stream: stream::once(async move { Ok::<_, std::io::Error>(object.data) }).boxed(),
        })
    }

    async fn object_exists(
        &self,
        bucket_name: &str,
        file_path: &str,
    ) -> Result<bool, StorageError> {
        if bucket_name != self.bucket {
            return Ok(false);
        }
        Ok(self.objects.read().contains_key(file_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn put_then_get_returns_same_bytes() {
        let store = MemoryObjectStore::new("uploads");
        let result = store
            .put_object("notes.txt", Bytes::from_static(b"hello"), Some("text/plain"))
            .await
            .unwrap();
        assert_eq!(result.bucket_name, "uploads");
        assert_eq!(result.file_name, "notes.txt");
        assert_eq!(result.url, "memory://uploads/notes.txt");

        let body = store.get_object("notes.txt").await.unwrap();
        assert_eq!(body.content_type.as_deref(), Some("text/plain"));
        assert_eq!(body.content_length, Some(5));
        let chunks: Vec<Bytes> = body.stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let store = MemoryObjectStore::new("uploads");
        let err = store.get_object("ghost.bin").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(ref key) if key == "ghost.bin"));
    }

    #[tokio::test]
    async fn exists_is_scoped_to_own_bucket() {
        let store = MemoryObjectStore::new("uploads");
        store
            .put_object("a.bin", Bytes::from_static(b"\x00\x01"), None)
            .await
            .unwrap();

        assert!(store.object_exists("uploads", "a.bin").await.unwrap());
        assert!(!store.object_exists("uploads", "b.bin").await.unwrap());
        assert!(!store.object_exists("other", "a.bin").await.unwrap());
    }

    #[tokio::test]
    async fn clones_share_contents() {
        let store = MemoryObjectStore::new("uploads");
        let clone = store.clone();
        clone
            .put_object("shared", Bytes::from_static(b"x"), None)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.remove("shared"));
        assert!(clone.is_empty());
    }
}
