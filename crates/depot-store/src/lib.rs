//! Depot storage adapter.
//!
//! Wraps an S3-compatible object store behind the [`ObjectStore`] trait so the
//! HTTP gateway only ever talks to a single configured bucket through three
//! calls: put, get and an existence check. Failures are reported as
//! [`StorageError`], which collapses into the two [`StorageErrorKind`]s the
//! gateway translates into status codes.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;
pub mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// Signing region used when none is configured. MinIO accepts any value.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Lifetime of presigned download URLs (seven days, the S3 maximum).
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub bucket_name: String,
    pub file_name: String,
    pub url: String,
}

/// Chunked object payload as produced by the backend.
pub type ByteChunkStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A fetched object, ready to be streamed to a client.
pub struct ObjectBody {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub stream: ByteChunkStream,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Connection settings for the S3 backend.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    /// Address buckets as `endpoint/bucket/key` instead of virtual hosts.
    pub path_style: bool,
    pub presign_ttl: Duration,
}

impl StorageConfig {
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            path_style: true,
            presign_ttl: DEFAULT_PRESIGN_TTL,
        }
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        let required = [
            ("endpoint", &self.endpoint),
            ("access key", &self.access_key),
            ("secret key", &self.secret_key),
            ("bucket", &self.bucket),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(StorageError::InvalidConfig(format!(
                    "storage {field} must not be empty"
                )));
            }
        }

        if self.presign_ttl.is_zero() || self.presign_ttl > DEFAULT_PRESIGN_TTL {
            return Err(StorageError::InvalidConfig(format!(
                "presign ttl must be between 1 and {} seconds",
                DEFAULT_PRESIGN_TTL.as_secs()
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("path_style", &self.path_style)
            .field("presign_ttl", &self.presign_ttl)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot reach storage backend: {0}")]
    Connectivity(String),

    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to presign download url: {0}")]
    Presign(String),

    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification the HTTP layer switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Connectivity,
    Unclassified,
}

impl StorageError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::Connectivity(_) => StorageErrorKind::Connectivity,
            _ => StorageErrorKind::Unclassified,
        }
    }
}

/// Operations the gateway needs from a bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket every operation targets.
    fn bucket_name(&self) -> &str;

    /// Stores `file_data` under `file_name` and returns where it landed.
    async fn put_object(
        &self,
        file_name: &str,
        file_data: Bytes,
        content_type: Option<&str>,
    ) -> Result<UploadResult, StorageError>;

    /// Fetches the object stored under `file_path`.
    async fn get_object(&self, file_path: &str) -> Result<ObjectBody, StorageError>;

    /// Returns `false` only when the backend positively reports the key as
    /// missing; any other failure is surfaced as an error.
    async fn object_exists(&self, bucket_name: &str, file_path: &str)
        -> Result<bool, StorageError>;
}
