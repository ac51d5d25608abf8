use std::{env, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::{
        multipart::MultipartRejection, rejection::PathRejection, DefaultBodyLimit, Multipart,
        Path, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use depot_store::{
    MemoryObjectStore, ObjectStore, S3ObjectStore, StorageConfig, StorageError,
    StorageErrorKind, UploadResult,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};
use utoipa_rapidoc::RapiDoc;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5000";
const GREETING: &str = "Hello World";
const UPLOAD_FIELD: &str = "file";
const MAX_FILE_PATH_CHARS: usize = 500;

const CONNECTIVITY_MESSAGE: &str = "Can not connect to object storage";
const SERVER_ERROR_MESSAGE: &str = "Server Error";
const FILE_NOT_FOUND_MESSAGE: &str = "File not exists";

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;
    let store = connect_store(&config).await?;
    let state = Arc::new(AppState { store });

    let app = build_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(
        addr = %config.listen_addr,
        backend = ?config.backend,
        bucket = %config.storage.bucket,
        "depot-daemon listening"
    );
    axum::serve(listener, app)
        .await
        .context("HTTP server exited")?;
    Ok(())
}

async fn connect_store(config: &AppConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StorageBackend::S3 => {
            let store = S3ObjectStore::connect(&config.storage)
                .await
                .context("failed to configure S3 client")?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!(
                bucket = %config.storage.bucket,
                "using in-memory storage; uploads are lost on restart"
            );
            Ok(Arc::new(MemoryObjectStore::new(
                config.storage.bucket.clone(),
            )))
        }
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/download/:file_path", get(download_file))
        .route("/openapi.json", get(openapi_json))
        .merge(RapiDoc::new("/openapi.json").path("/docs"))
        .with_state(state)
}

#[derive(Clone)]
struct AppState {
    store: Arc<dyn ObjectStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageBackend {
    S3,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s3" | "minio" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!(
                "unknown storage backend '{other}' (expected 's3' or 'memory')"
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct AppConfig {
    listen_addr: SocketAddr,
    backend: StorageBackend,
    storage: StorageConfig,
}

impl AppConfig {
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr: SocketAddr = lookup("DEPOT_API_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .context("invalid DEPOT_API_ADDR")?;

        let backend = match non_empty(&lookup, "DEPOT_STORAGE_BACKEND") {
            Some(value) => value
                .parse::<StorageBackend>()
                .context("invalid DEPOT_STORAGE_BACKEND")?,
            None => StorageBackend::S3,
        };

        let bucket = non_empty(&lookup, "DEPOT_S3_BUCKET")
            .context("DEPOT_S3_BUCKET must be configured")?;

        let credential = |key: &str| -> Result<String> {
            match backend {
                StorageBackend::S3 => {
                    non_empty(&lookup, key).with_context(|| format!("{key} must be configured"))
                }
                StorageBackend::Memory => Ok(non_empty(&lookup, key).unwrap_or_default()),
            }
        };
        let endpoint = credential("DEPOT_S3_ENDPOINT")?;
        let access_key = credential("DEPOT_S3_ACCESS_KEY")?;
        let secret_key = credential("DEPOT_S3_SECRET_KEY")?;

        let mut storage = StorageConfig::new(endpoint, access_key, secret_key, bucket);

        if let Some(region) = non_empty(&lookup, "DEPOT_S3_REGION") {
            storage.region = region;
        }

        if let Some(value) = non_empty(&lookup, "DEPOT_S3_PATH_STYLE") {
            storage.path_style = parse_bool(&value)
                .with_context(|| format!("invalid DEPOT_S3_PATH_STYLE value '{value}'"))?;
        }

        if let Some(value) = non_empty(&lookup, "DEPOT_PRESIGN_TTL_SECONDS") {
            let seconds: u64 = value
                .parse()
                .with_context(|| format!("invalid DEPOT_PRESIGN_TTL_SECONDS value '{value}'"))?;
            storage.presign_ttl = Duration::from_secs(seconds);
        }

        if backend == StorageBackend::S3 {
            storage
                .validate()
                .context("invalid storage configuration")?;
        }

        Ok(Self {
            listen_addr,
            backend,
            storage,
        })
    }
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Static greeting", body = String))
)]
async fn root() -> Json<&'static str> {
    Json(GREETING)
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored", body = UploadFileResponse),
        (status = 400, description = "Malformed upload or storage unreachable", body = ErrorResponse),
        (status = 500, description = "Unexpected storage failure", body = ErrorResponse)
    )
)]
async fn upload_file(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadFileResponse>, ApiError> {
    let mut multipart =
        multipart.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let upload = read_upload_field(&mut multipart).await?;

    let file_name = normalize_file_name(&upload.file_name);
    if file_name.is_empty() {
        return Err(ApiError::bad_request("file name must not be empty"));
    }

    let result = state
        .store
        .put_object(&file_name, upload.data, upload.content_type.as_deref())
        .await
        .map_err(ApiError::from)?;

    info!(bucket = %result.bucket_name, key = %result.file_name, "file uploaded");
    Ok(Json(UploadFileResponse::from(result)))
}

#[utoipa::path(
    get,
    path = "/download/{file_path}",
    params(("file_path" = String, Path, description = "Object key, 1 to 500 characters")),
    responses(
        (status = 200, description = "Raw object bytes", content_type = "application/octet-stream"),
        (status = 400, description = "File missing, invalid path or storage unreachable", body = ErrorResponse),
        (status = 500, description = "Unexpected storage failure", body = ErrorResponse)
    )
)]
async fn download_file(
    State(state): State<Arc<AppState>>,
    file_path: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(file_path) =
        file_path.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    validate_file_path(&file_path)?;

    // Check existence first so a missing key is a clean 400 rather than a backend error.
    let exists = state
        .store
        .object_exists(state.store.bucket_name(), &file_path)
        .await
        .map_err(ApiError::from)?;
    if !exists {
        return Err(ApiError::file_not_found());
    }

    let object = state
        .store
        .get_object(&file_path)
        .await
        .map_err(ApiError::from)?;

    let content_type = object
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

    let mut response = Response::new(Body::from_stream(object.stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = object.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(docs::ApiDoc::openapi())
}

struct UploadedFile {
    file_name: String,
    content_type: Option<String>,
    data: Bytes,
}

async fn read_upload_field(multipart: &mut Multipart) -> Result<UploadedFile, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(err.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| ApiError::bad_request("file field must carry a filename"))?;
        let content_type = field.content_type().map(str::to_owned);
        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(err.body_text()))?;

        return Ok(UploadedFile {
            file_name,
            content_type,
            data,
        });
    }

    Err(ApiError::bad_request(format!(
        "multipart field '{UPLOAD_FIELD}' is required"
    )))
}

/// Collapses whitespace runs to a single space and trims both ends.
fn normalize_file_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn validate_file_path(file_path: &str) -> Result<(), ApiError> {
    let length = file_path.chars().count();
    if length == 0 || length > MAX_FILE_PATH_CHARS {
        return Err(ApiError::bad_request(format!(
            "file path must be between 1 and {MAX_FILE_PATH_CHARS} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct UploadFileResponse {
    bucket_name: String,
    file_name: String,
    url: String,
}

impl From<UploadResult> for UploadFileResponse {
    fn from(result: UploadResult) -> Self {
        Self {
            bucket_name: result.bucket_name,
            file_name: result.file_name,
            url: result.url,
        }
    }
}

/// Multipart body of `POST /upload`, documentation only.
#[derive(ToSchema)]
#[allow(dead_code)]
struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    /// Underlying failure, logged but never sent to the client.
    detail: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "400", message)
    }

    fn connectivity() -> Self {
        Self::bad_request(CONNECTIVITY_MESSAGE)
    }

    fn file_not_found() -> Self {
        Self::bad_request(FILE_NOT_FOUND_MESSAGE)
    }

    fn server_error() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "999",
            SERVER_ERROR_MESSAGE,
        )
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let api_error = match err.kind() {
            StorageErrorKind::Connectivity => ApiError::connectivity(),
            StorageErrorKind::Unclassified => ApiError::server_error(),
        };
        api_error.with_detail(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = self.detail.as_deref().unwrap_or_default();
        if self.status.is_server_error() {
            error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                detail,
                "api error"
            );
        } else {
            warn!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                detail,
                "api error"
            );
        }
        let body = Json(ErrorResponse {
            http_code: self.status.as_u16(),
            code: self.code.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    http_code: u16,
    code: String,
    message: String,
}

pub mod docs {
    use super::*;

    #[derive(OpenApi)]
    #[openapi(
        info(
            title = "depot",
            version = "0.1.0",
            description = "HTTP gateway over an S3 bucket"
        ),
        paths(root, upload_file, download_file),
        components(schemas(UploadFileResponse, UploadForm, ErrorResponse))
    )]
    pub struct ApiDoc;
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
