use std::sync::Arc;

use bytes::Bytes;
use depot_store::{MemoryObjectStore, ObjectStore, StorageErrorKind};
use futures::TryStreamExt;

async fn read_all(store: &dyn ObjectStore, key: &str) -> anyhow::Result<Vec<u8>> {
    let body = store.get_object(key).await?;
    let chunks: Vec<Bytes> = body.stream.try_collect().await?;
    Ok(chunks.concat())
}

#[tokio::test]
async fn trait_object_round_trips_binary_payload() -> anyhow::Result<()> {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new("media"));
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    let result = store
        .put_object(
            "blob.bin",
            Bytes::from(payload.clone()),
            Some("application/octet-stream"),
        )
        .await?;
    assert_eq!(result.bucket_name, store.bucket_name());
    assert_eq!(result.file_name, "blob.bin");

    assert!(store.object_exists("media", "blob.bin").await?);
    assert_eq!(read_all(store.as_ref(), "blob.bin").await?, payload);
    Ok(())
}

#[tokio::test]
async fn overwriting_a_key_replaces_content() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new("media");
    store
        .put_object("same.txt", Bytes::from_static(b"first"), Some("text/plain"))
        .await?;
    store
        .put_object("same.txt", Bytes::from_static(b"second"), None)
        .await?;

    assert_eq!(store.len(), 1);
    let body = store.get_object("same.txt").await?;
    assert_eq!(body.content_type, None);
    assert_eq!(read_all(&store, "same.txt").await?, b"second");
    Ok(())
}

#[tokio::test]
async fn removed_key_reports_missing() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new("media");
    store
        .put_object("gone.txt", Bytes::from_static(b"bye"), None)
        .await?;
    assert!(store.remove("gone.txt"));

    assert!(!store.object_exists("media", "gone.txt").await?);
    let err = store.get_object("gone.txt").await.unwrap_err();
    assert_eq!(err.kind(), StorageErrorKind::Unclassified);
    Ok(())
}
