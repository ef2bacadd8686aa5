use crate::api::error::AppError;
use crate::services::temp_file_store::ResolveError;
use crate::utils::headers::{attachment_disposition, content_type_for};
use crate::utils::validation::{sanitize_filename, validate_file_size};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::{ReaderStream, StreamReader};
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct TempFileResponse {
    /// Relative download URL carrying the issued token
    pub url: String,
    pub filename: String,
    /// Moment the link stops working
    pub expires: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    pub filename: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/temp-file",
    request_body(content = Multipart, description = "File upload ('file' field)"),
    responses(
        (status = 200, description = "Temporary download link issued", body = TempFileResponse),
        (status = 400, description = "Missing or invalid file"),
        (status = 413, description = "File exceeds the upload limit")
    ),
    tag = "temp-files"
)]
pub async fn upload_temp_file(
    State(state): State<crate::AppState>,
    mut multipart: Multipart,
) -> Result<Json<TempFileResponse>, AppError> {
    let mut issued = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_filename = field.file_name().unwrap_or("unnamed").to_string();
        let filename = sanitize_filename(&original_filename)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let body_with_io_error =
            field.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
        let reader = StreamReader::new(body_with_io_error);
        // One byte past the cap is enough to notice an oversized upload
        // without buffering the whole body.
        let mut reader = reader.take(state.config.max_file_size as u64 + 1);

        let scratch = NamedTempFile::new_in(&state.config.scratch_dir)
            .map_err(|e| AppError::Internal(format!("Failed to create scratch file: {}", e)))?;
        let std_file = scratch
            .reopen()
            .map_err(|e| AppError::Internal(format!("Failed to open scratch file: {}", e)))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write scratch file: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to flush scratch file: {}", e)))?;

        // Failing out here drops the NamedTempFile, which unlinks the
        // partial scratch file.
        if validate_file_size(written as usize, state.config.max_file_size).is_err() {
            return Err(AppError::PayloadTooLarge(format!(
                "File exceeds the {} MB upload limit",
                state.config.max_file_size / 1024 / 1024
            )));
        }
        if written == 0 {
            return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
        }

        let (_file, path) = scratch
            .keep()
            .map_err(|e| AppError::Internal(format!("Failed to persist scratch file: {}", e)))?;

        let handle = state.store.register(path, filename.clone()).await;
        tracing::info!("📎 Issued temp link for \"{}\"", filename);

        let encoded_filename = utf8_percent_encode(&filename, NON_ALPHANUMERIC);
        issued = Some(TempFileResponse {
            url: format!("/api/temp-file/{}?filename={}", handle.token, encoded_filename),
            filename,
            expires: handle.expires_at,
        });
    }

    issued
        .map(Json)
        .ok_or(AppError::BadRequest("No file provided".to_string()))
}

#[utoipa::path(
    get,
    path = "/api/temp-file/{token}",
    params(
        ("token" = String, Path, description = "Issued download token"),
        ("filename" = Option<String>, Query, description = "Overrides the stored filename")
    ),
    responses(
        (status = 200, description = "File download stream"),
        (status = 404, description = "Unknown token"),
        (status = 410, description = "Link expired"),
        (status = 500, description = "Backing file unreadable")
    ),
    tag = "temp-files"
)]
pub async fn download_temp_file(
    State(state): State<crate::AppState>,
    Path(token): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let resolved = state.store.resolve(&token).await.map_err(|e| match e {
        ResolveError::NotFound => {
            AppError::NotFound("No download is registered for this link".to_string())
        }
        ResolveError::Expired => {
            AppError::Gone("This download link has expired. Please request a new one.".to_string())
        }
    })?;

    // A live handle whose bytes are gone (disk eviction, cleanup race) is a
    // server-side glitch, not a dead link.
    let file = tokio::fs::File::open(&resolved.path).await.map_err(|e| {
        tracing::error!(
            "Failed to open scratch file {}: {}",
            resolved.path.display(),
            e
        );
        AppError::Internal("Failed to read temporary file".to_string())
    })?;
    let content_length = file
        .metadata()
        .await
        .map_err(|e| {
            tracing::error!(
                "Failed to stat scratch file {}: {}",
                resolved.path.display(),
                e
            );
            AppError::Internal("Failed to read temporary file".to_string())
        })?
        .len();

    let filename = query.filename.unwrap_or(resolved.filename);
    let body = Body::from_stream(ReaderStream::new(file));

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&filename))
        .header(header::CONTENT_DISPOSITION, attachment_disposition(&filename))
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    state.store.consume_after_serve(&token);

    Ok(response)
}
