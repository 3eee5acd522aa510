//! HTTP surface over [`ConversionPipeline`].
//!
//! | Route | Body | Success |
//! |-------|------|---------|
//! | `POST /convert/images-to-document` | multipart, one file part per image, in order | `application/pdf`, `images.pdf` |
//! | `POST /convert/document-to-images` | multipart `document` part + `format`, `scale`/`resolution` fields | one image, or `pages.zip` |
//! | `GET /health` | | `{"status":"ok"}` |
//!
//! Upload parts are streamed straight into the request's scratch area, so
//! the whole request lives under one directory that is removed when the
//! request ends, whether it succeeded, failed, or the client disconnected.
//!
//! Failures return `{"error": <summary>, "details": <cause>}` with `400` for
//! validation errors and `500` for everything else.

use crate::convert::ConversionPipeline;
use crate::error::ConvertError;
use crate::output::OutputArtifact;
use crate::pipeline::input::{ConversionRequest, DocumentSource, ImageKind, RawImage};
use crate::pipeline::pool::CancelToken;
use crate::pipeline::scratch::ScratchArea;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Default request body ceiling: 256 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 256 * 1024 * 1024;

const DOCUMENT_FIELDS: [&str; 3] = ["document", "file", "pdf"];

#[derive(Clone)]
struct AppState {
    pipeline: Arc<ConversionPipeline>,
}

/// Build the router. `body_limit` caps each request body in bytes.
pub fn build_router(pipeline: Arc<ConversionPipeline>, body_limit: usize) -> Router {
    Router::new()
        .route("/convert/images-to-document", post(images_to_document))
        .route("/convert/document-to-images", post(document_to_images))
        .route("/health", get(health))
        .with_state(AppState { pipeline })
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(
    pipeline: Arc<ConversionPipeline>,
    addr: SocketAddr,
    body_limit: usize,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, build_router(pipeline, body_limit))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, draining in-flight requests"),
        Err(e) => warn!("Failed to capture Ctrl-C signal: {}", e),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn images_to_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let area = state.pipeline.acquire_scratch()?;
    let mut images = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(upload_err)? {
        if field.file_name().is_none() {
            // Plain form fields carry no image data.
            continue;
        }
        let position = images.len() + 1;
        let kind = ImageKind::detect(field.content_type(), field.file_name()).ok_or_else(|| {
            ConvertError::UnsupportedImageKind {
                position,
                declared: field
                    .content_type()
                    .or(field.file_name())
                    .unwrap_or("unknown")
                    .to_string(),
            }
        })?;

        let ext = match kind {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
        };
        let path = area.child(&format!("upload-{}.{}", position, ext));
        if stream_field(field, &path).await? == 0 {
            // Browsers send an empty file part when nothing was selected.
            let _ = tokio::fs::remove_file(&path).await;
            continue;
        }
        images.push(RawImage::from_file(kind, path));
    }

    let request = ConversionRequest::ImagesToDocument { images };
    run(&state, area, request).await
}

async fn document_to_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let area = state.pipeline.acquire_scratch()?;
    let mut document = None;
    let (mut format, mut scale, mut resolution) = (None, None, None);

    while let Some(field) = multipart.next_field().await.map_err(upload_err)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "format" => format = Some(field.text().await.map_err(upload_err)?),
            "scale" => scale = Some(field.text().await.map_err(upload_err)?),
            "resolution" | "dpi" => resolution = Some(field.text().await.map_err(upload_err)?),
            other if document.is_none()
                && (DOCUMENT_FIELDS.contains(&other) || field.file_name().is_some()) =>
            {
                let path = area.child("input.pdf");
                if stream_field(field, &path).await? > 0 {
                    document = Some(path);
                }
            }
            _ => {}
        }
    }

    let document = document.ok_or(ConvertError::NoDocument)?;
    let options = state.pipeline.config().raster_options(
        format.as_deref(),
        scale.as_deref(),
        resolution.as_deref(),
    );
    let request = ConversionRequest::DocumentToImages {
        document: DocumentSource::File(document),
        options,
    };
    run(&state, area, request).await
}

async fn run(
    state: &AppState,
    area: ScratchArea,
    request: ConversionRequest,
) -> Result<Response, ApiError> {
    let cancel = CancelToken::new();
    let artifact = state.pipeline.convert_in(area, request, &cancel).await?;
    artifact_response(artifact).await
}

/// Stream a multipart field to `path`, returning the number of bytes written.
async fn stream_field(mut field: Field<'_>, path: &Path) -> Result<u64, ConvertError> {
    let staging_err = |source| ConvertError::Staging {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(path).await.map_err(staging_err)?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(upload_err)? {
        file.write_all(&chunk).await.map_err(staging_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(staging_err)?;
    Ok(written)
}

async fn artifact_response(artifact: OutputArtifact) -> Result<Response, ApiError> {
    let mime = artifact.mime().to_string();
    let disposition = format!("attachment; filename=\"{}\"", artifact.filename());

    let bytes = tokio::task::spawn_blocking(move || artifact.into_bytes())
        .await
        .map_err(|e| ConvertError::Internal(format!("serialisation task failed: {e}")))??;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

fn upload_err(e: MultipartError) -> ConvertError {
    ConvertError::UnreadableUpload {
        detail: e.body_text(),
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: &'static str,
    details: String,
}

struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

impl From<ConvertError> for ApiError {
    fn from(e: ConvertError) -> Self {
        let status = if e.is_validation() {
            warn!("Rejected request: {}", e);
            StatusCode::BAD_REQUEST
        } else {
            error!("Conversion failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        ApiError {
            status,
            body: ApiErrorBody {
                error: e.summary(),
                details: e.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_400() {
        let api = ApiError::from(ConvertError::ZeroPages);
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.body.error, "Invalid input");
        assert!(api.body.details.contains("no pages"));
    }

    #[test]
    fn other_errors_map_to_500() {
        let api = ApiError::from(ConvertError::Internal("duplicate page result".into()));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.body.error, "Internal error");
    }
}
