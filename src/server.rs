//! HTTP surface over a [`DedupStore`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::check::IntegrityReport;
use crate::config::ChunkSizes;
use crate::datamodel::Backend;
use crate::error::Error;
use crate::stats::Statistics;
use crate::store::{DedupStore, UploadReport};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] Error),

    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Store(err) => match err {
                Error::InvalidConfiguration(_) => "invalid_configuration",
                Error::DuplicatePath(_) => "duplicate_path",
                Error::FileNotFound(_) => "file_not_found",
                err if err.is_corruption() => "storage_corrupt",
                _ => "storage_failure",
            },
            Self::Task(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(err) => match err {
                Error::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
                Error::DuplicatePath(_) => StatusCode::CONFLICT,
                Error::FileNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

type AppState<B> = Arc<DedupStore<B>>;

pub fn router<B: Backend + 'static>(store: Arc<DedupStore<B>>, max_upload: usize) -> Router {
    Router::new()
        .route("/upload", post(upload::<B>))
        .route("/download", get(download::<B>))
        .route("/delete", delete(remove::<B>))
        .route("/stats", get(stats::<B>))
        .route("/check", get(check::<B>))
        .layer(DefaultBodyLimit::max(max_upload))
        .with_state(store)
}

/// Runs a store operation on the blocking pool.
async fn blocking<B, T, F>(store: &AppState<B>, f: F) -> ApiResult<T>
where
    B: Backend + 'static,
    T: Send + 'static,
    F: FnOnce(&DedupStore<B>) -> crate::Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    pub path: String,
    pub min_chunk: Option<u32>,
    pub avg_chunk: Option<u32>,
    pub max_chunk: Option<u32>,
}

impl UploadParams {
    fn sizes(&self) -> ApiResult<ChunkSizes> {
        match (self.min_chunk, self.avg_chunk, self.max_chunk) {
            (Some(min), Some(avg), Some(max)) => Ok(ChunkSizes::new(min, avg, max)),
            _ => Err(ApiError::BadRequest(
                "minChunk, avgChunk and maxChunk are required".into(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub path: String,
    #[serde(flatten)]
    pub report: UploadReport,
    pub total_files: u64,
    pub deduplication_ratio: f64,
}

async fn upload<B: Backend + 'static>(
    State(store): State<AppState<B>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<Json<UploadResponse>> {
    if params.path.is_empty() {
        return Err(ApiError::BadRequest("path must not be empty".into()));
    }
    let sizes = params.sizes()?;
    let path = params.path.clone();
    let (report, stats) = blocking(&store, move |store| {
        let report = store.upload_file(&path, sizes, &body)?;
        Ok((report, store.statistics()?))
    })
    .await?;

    Ok(Json(UploadResponse {
        path: params.path,
        report,
        total_files: stats.total_files,
        deduplication_ratio: stats.deduplication_ratio,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileParams {
    pub file_path: String,
}

async fn download<B: Backend + 'static>(
    State(store): State<AppState<B>>,
    Query(params): Query<FileParams>,
) -> ApiResult<Response> {
    let path = params.file_path.clone();
    let contents = blocking(&store, move |store| store.download_file(&path)).await?;

    let name = params
        .file_path
        .rsplit('/')
        .next()
        .unwrap_or(&params.file_path)
        .replace('"', "");
    let disposition = format!("attachment; filename=\"{name}\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        contents,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub path: String,
    pub deleted_chunks: usize,
    pub deleted_bytes: u64,
    pub removed_containers: usize,
}

async fn remove<B: Backend + 'static>(
    State(store): State<AppState<B>>,
    Query(params): Query<FileParams>,
) -> ApiResult<Json<DeleteResponse>> {
    let path = params.file_path.clone();
    let report = blocking(&store, move |store| store.delete_file(&path)).await?;
    Ok(Json(DeleteResponse {
        path: params.file_path,
        deleted_chunks: report.deleted_chunks,
        deleted_bytes: report.deleted_bytes,
        removed_containers: report.removed_containers.len(),
    }))
}

async fn stats<B: Backend + 'static>(
    State(store): State<AppState<B>>,
) -> ApiResult<Json<Statistics>> {
    Ok(Json(blocking(&store, |store| store.statistics()).await?))
}

async fn check<B: Backend + 'static>(
    State(store): State<AppState<B>>,
) -> ApiResult<Json<IntegrityReport>> {
    Ok(Json(blocking(&store, |store| store.check()).await?))
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    use super::*;
    use crate::datamodel::MemBackend;
    use crate::fingerprint::Fingerprint;

    fn state() -> AppState<MemBackend> {
        Arc::new(DedupStore::new(MemBackend::new()))
    }

    fn upload_params(path: &str) -> UploadParams {
        UploadParams {
            path: path.into(),
            min_chunk: Some(64),
            avg_chunk: Some(256),
            max_chunk: Some(1024),
        }
    }

    fn file_params(path: &str) -> FileParams {
        FileParams {
            file_path: path.into(),
        }
    }

    #[test]
    fn maps_store_errors_to_statuses() {
        let cases = [
            (Error::InvalidConfiguration("x".into()), StatusCode::BAD_REQUEST),
            (Error::DuplicatePath("a".into()), StatusCode::CONFLICT),
            (Error::FileNotFound("a".into()), StatusCode::NOT_FOUND),
            (
                Error::FingerprintMismatch(Fingerprint::of(b"x")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (Error::Conflict, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
        assert_eq!(
            ApiError::from(Error::FingerprintMismatch(Fingerprint::of(b"x"))).code(),
            "storage_corrupt"
        );
    }

    #[tokio::test]
    async fn requires_every_chunk_size() {
        let store = state();
        let mut params = upload_params("a");
        params.max_chunk = None;

        let err = upload(State(store.clone()), Query(params), Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "bad_request");
        assert!(!store.contains("a").unwrap());

        assert_eq!(
            upload_params("a").sizes().unwrap(),
            ChunkSizes::new(64, 256, 1024)
        );
    }

    #[tokio::test]
    async fn upload_download_delete() {
        let store = state();
        let mut contents = vec![0; 5000];
        StdRng::seed_from_u64(1).fill_bytes(&mut contents);
        let body = Bytes::from(contents.clone());

        let Json(response) = upload(
            State(store.clone()),
            Query(upload_params("dir/a.bin")),
            body.clone(),
        )
        .await
        .unwrap();
        assert_eq!(response.report.size, 5000);
        assert_eq!(response.total_files, 1);

        let err = upload(State(store.clone()), Query(upload_params("dir/a.bin")), body)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let response = download(State(store.clone()), Query(file_params("dir/a.bin")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"a.bin\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes, contents);

        let Json(deleted) = remove(State(store.clone()), Query(file_params("dir/a.bin")))
            .await
            .unwrap();
        assert_eq!(deleted.deleted_bytes, 5000);

        let err = download(State(store.clone()), Query(file_params("dir/a.bin")))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let Json(stats) = stats(State(store)).await.unwrap();
        assert_eq!(stats, Statistics::default());
    }

    #[tokio::test]
    async fn rejects_bad_sizes() {
        let mut params = upload_params("a");
        params.avg_chunk = Some(300);
        let err = upload(State(state()), Query(params), Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_configuration");
    }
}
