//! Request handlers.

use super::AppState;
use crate::error::ServiceError;
use crate::pipeline::ConversionRequest;
use crate::quality::Quality;
use crate::store::StoredArtifact;
use axum::{
    body::Body,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Body of a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub pdf_url: String,
    pub image_url: String,
    pub expires_at: DateTime<Utc>,
    pub pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub artifacts: usize,
    pub running: usize,
}

#[derive(Default)]
struct UploadForm {
    file: Option<(Bytes, Option<String>)>,
    quality: Option<String>,
}

/// POST /convert-pdf/
pub(crate) async fn convert_pdf(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ConvertResponse>, ServiceError> {
    let service = state.service();
    let max_upload = service.config().max_upload_bytes;

    let multipart = multipart
        .map_err(|e| ServiceError::invalid_input(format!("expected multipart/form-data: {e}")))?;
    let form = read_form(multipart, max_upload).await?;

    let Some((source, filename)) = form.file else {
        Quality::from_form(form.quality.as_deref())?;
        return Err(ServiceError::invalid_input("no 'file' field in the form"));
    };
    let request =
        ConversionRequest::validate(source, form.quality.as_deref(), filename, max_upload)?;

    let outcome = service.convert(request).await?;
    let config = service.config();
    Ok(Json(ConvertResponse {
        pdf_url: config.artifact_url(&format!("/download/{}", outcome.pdf.id)),
        image_url: config.artifact_url(&format!("/image/{}", outcome.preview.id)),
        expires_at: outcome.pdf.expires_at.min(outcome.preview.expires_at),
        pages: outcome.page_count,
    }))
}

async fn read_form(mut multipart: Multipart, max_upload: usize) -> Result<UploadForm, ServiceError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_upload))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, max_upload))?;
                form.file = Some((data, filename));
            }
            "quality" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, max_upload))?;
                form.quality = Some(text);
            }
            other => debug!("Ignoring form field '{}'", other),
        }
    }
    Ok(form)
}

fn multipart_error(e: MultipartError, max_upload: usize) -> ServiceError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge { max: max_upload }
    } else {
        ServiceError::invalid_input(format!("malformed multipart body: {}", e.body_text()))
    }
}

/// GET /download/:id
pub(crate) async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServiceError> {
    let artifact = state.service().fetch(&id).await?;
    Ok(artifact_response(artifact, "attachment", state.service().store().now()))
}

/// GET /image/:id
///
/// Only image artifacts are served here; a PDF id reads as not found.
pub(crate) async fn image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServiceError> {
    let artifact = state.service().fetch(&id).await?;
    if !artifact.meta.mime_type.starts_with("image/") {
        return Err(ServiceError::NotFound { id });
    }
    Ok(artifact_response(artifact, "inline", state.service().store().now()))
}

fn artifact_response(
    artifact: StoredArtifact,
    disposition: &str,
    now: DateTime<Utc>,
) -> Response {
    let StoredArtifact { meta, bytes } = artifact;
    let disposition = match &meta.filename {
        Some(name) => format!("{disposition}; filename=\"{name}\""),
        None => disposition.to_string(),
    };
    debug!(
        id = %meta.id,
        mime = %meta.mime_type,
        size = bytes.len(),
        "Serving artifact"
    );

    let headers = [
        (header::CONTENT_TYPE, meta.mime_type.clone()),
        (header::CONTENT_LENGTH, bytes.len().to_string()),
        (header::CONTENT_DISPOSITION, disposition),
        (
            header::CACHE_CONTROL,
            format!("private, max-age={}", meta.remaining_secs(now)),
        ),
    ];
    (headers, Body::from(bytes)).into_response()
}

/// GET /health
pub(crate) async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, ServiceError> {
    let service = state.service();
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        artifacts: service.store().count().await?,
        running: service.pool().running(),
    }))
}
