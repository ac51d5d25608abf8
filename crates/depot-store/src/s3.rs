//! S3 backend built on `aws-sdk-s3`; works against MinIO with path-style
//! addressing.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    operation::head_object::HeadObjectError,
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::{ObjectBody, ObjectStore, StorageConfig, StorageError, UploadResult};

const CREDENTIALS_PROVIDER: &str = "depot-static";

/// Handle to one bucket on an S3-compatible backend.
///
/// The SDK client is internally reference counted, so cloning is cheap and
/// every clone shares the same connection pool.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    presign_ttl: Duration,
}

impl S3ObjectStore {
    /// Builds the SDK client from static credentials. No request is sent, so
    /// an unreachable backend only shows up on the first operation.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        config.validate()?;

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            CREDENTIALS_PROVIDER,
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.path_style)
            .build();

        info!(
            endpoint = %config.endpoint,
            bucket = %config.bucket,
            region = %config.region,
            path_style = config.path_style,
            "s3 client configured"
        );

        Ok(Self::from_client(
            Client::from_conf(s3_config),
            config.bucket.clone(),
            config.presign_ttl,
        ))
    }

    pub fn from_client(client: Client, bucket: impl Into<String>, presign_ttl: Duration) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            presign_ttl,
        }
    }

    /// Presigned GET for `key`, valid for the configured ttl.
    pub async fn presigned_url(&self, key: &str) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(self.presign_ttl)
            .map_err(|err| StorageError::Presign(err.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| StorageError::Presign(DisplayErrorContext(&err).to_string()))?;
        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket_name(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        file_name: &str,
        file_data: Bytes,
        content_type: Option<&str>,
    ) -> Result<UploadResult, StorageError> {
        let size = file_data.len();
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(file_name)
            .set_content_type(content_type.map(str::to_owned))
            .body(ByteStream::from(file_data))
            .send()
            .await
            .map_err(|err| classify_sdk_error("put_object", err))?;

        debug!(
            bucket = %self.bucket,
            key = file_name,
            size,
            e_tag = output.e_tag().unwrap_or_default(),
            "object stored"
        );

        let url = self.presigned_url(file_name).await?;
        Ok(UploadResult {
            bucket_name: self.bucket.clone(),
            file_name: file_name.to_string(),
            url,
        })
    }

    async fn get_object(&self, file_path: &str) -> Result<ObjectBody, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(file_path)
            .send()
            .await
            .map_err(|err| classify_sdk_error("get_object", err))?;

        let content_type = output.content_type().map(str::to_owned);
        let content_length = output
            .content_length()
            .and_then(|length| u64::try_from(length).ok());
        debug!(bucket = %self.bucket, key = file_path, ?content_length, "object fetched");

        Ok(ObjectBody {
            content_type,
            content_length,
            stream: ReaderStream::new(output.body.into_async_read()).boxed(),
        })
    }

    async fn object_exists(
        &self,
        bucket_name: &str,
        file_path: &str,
    ) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(bucket_name)
            .key(file_path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(classify_sdk_error("head_object", err)),
        }
    }
}

fn is_not_found(err: &SdkError<HeadObjectError, HttpResponse>) -> bool {
    match err {
        SdkError::ServiceError(service) => {
            service.err().is_not_found() || service.raw().status().as_u16() == 404
        }
        _ => false,
    }
}

/// Failures before a response arrives (refused connection, DNS, TLS, timeout)
/// mean the backend is unreachable; everything else is a backend answer.
fn classify_sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> StorageError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = format!("{operation}: {}", DisplayErrorContext(&err));
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            StorageError::Connectivity(detail)
        }
        _ => StorageError::Backend(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StorageErrorKind, DEFAULT_PRESIGN_TTL};
    use aws_sdk_s3::config::retry::RetryConfig;
    use futures::TryStreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const FORBIDDEN: &str = "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const UNAVAILABLE: &str =
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const FOUND: &str = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const OBJECT: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello depot";

    /// Local HTTP listener that answers every request with `response`.
    async fn canned_backend(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    async fn store_answering(response: &'static str) -> S3ObjectStore {
        let endpoint = canned_backend(response).await;
        S3ObjectStore::from_client(offline_client(&endpoint), "uploads", DEFAULT_PRESIGN_TTL)
    }

    fn offline_client(endpoint: &str) -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("minio", "minio123", None, None, "test"))
            .force_path_style(true)
            .retry_config(RetryConfig::disabled())
            .build();
        Client::from_conf(config)
    }

    #[test]
    fn timeout_is_connectivity() {
        let err = SdkError::<HeadObjectError, HttpResponse>::timeout_error("deadline elapsed");
        let classified = classify_sdk_error("head_object", err);
        assert_eq!(classified.kind(), StorageErrorKind::Connectivity);
        assert!(classified.to_string().contains("head_object"));
    }

    #[test]
    fn construction_failure_is_unclassified() {
        let err = SdkError::<HeadObjectError, HttpResponse>::construction_failure("bad key");
        let classified = classify_sdk_error("put_object", err);
        assert_eq!(classified.kind(), StorageErrorKind::Unclassified);
        assert!(matches!(classified, StorageError::Backend(_)));
    }

    #[tokio::test]
    async fn presigned_url_targets_bucket_and_key() {
        let store = S3ObjectStore::from_client(
            offline_client("http://127.0.0.1:9000"),
            "uploads",
            DEFAULT_PRESIGN_TTL,
        );
        let url = store.presigned_url("report.pdf").await.unwrap();
        assert!(url.starts_with("http://127.0.0.1:9000/uploads/report.pdf?"), "{url}");
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Expires=604800"));
    }

    #[tokio::test]
    async fn refused_connection_is_connectivity() {
        let store = S3ObjectStore::from_client(
            offline_client("http://127.0.0.1:1"),
            "uploads",
            DEFAULT_PRESIGN_TTL,
        );

        let err = store.object_exists("uploads", "a.txt").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::Connectivity, "{err}");

        let err = store
            .put_object("a.txt", Bytes::from_static(b"hi"), Some("text/plain"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::Connectivity, "{err}");
    }

    #[tokio::test]
    async fn connect_rejects_blank_bucket() {
        let config = StorageConfig::new("http://127.0.0.1:9000", "minio", "minio123", "");
        let err = S3ObjectStore::connect(&config).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn head_404_means_missing() {
        let store = store_answering(NOT_FOUND).await;
        assert!(!store.object_exists("uploads", "gone.txt").await.unwrap());
    }

    #[tokio::test]
    async fn head_200_means_present() {
        let store = store_answering(FOUND).await;
        assert!(store.object_exists("uploads", "a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn head_refusals_are_unclassified() {
        for response in [FORBIDDEN, UNAVAILABLE] {
            let store = store_answering(response).await;
            let err = store.object_exists("uploads", "a.txt").await.unwrap_err();
            assert_eq!(err.kind(), StorageErrorKind::Unclassified, "{err}");
        }
    }

    #[tokio::test]
    async fn get_streams_backend_body() {
        let store = store_answering(OBJECT).await;
        let body = store.get_object("a.txt").await.unwrap();
        assert_eq!(body.content_type.as_deref(), Some("text/plain"));
        assert_eq!(body.content_length, Some(11));

        let chunks: Vec<Bytes> = body.stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello depot");
    }
}
