//! Multipart upload handler.
//!
//! Each `file` part is spooled to a temp file before ingestion so large
//! containers never sit in memory. Text fields apply to every file of the
//! request, whatever their position in the body.

use anyhow::Context;
use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use mediaconv_core::{AppError, ValidationError};
use mediaconv_services::{IngestOptions, UploadedFile};

use crate::constants::{FILE_FIELD, FOLDER_FIELD, SKIP_CONVERSION_FIELD};
use crate::error::HttpAppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub media_ids: Vec<Uuid>,
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

async fn spool(mut field: Field<'_>, limit: u64) -> Result<UploadedFile, HttpAppError> {
    let filename = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| AppError::InvalidInput("File part has no filename".to_string()))?;

    let temp = NamedTempFile::new().context("Failed to create upload spool")?;
    let mut out = tokio::fs::File::from_std(temp.reopen().context("Failed to open upload spool")?);
    let mut written = 0u64;

    while let Some(chunk) = field.chunk().await? {
        written += chunk.len() as u64;
        if written > limit {
            return Err(AppError::Validation(ValidationError::UploadTooLarge { limit }).into());
        }
        out.write_all(&chunk)
            .await
            .context("Failed to write upload spool")?;
    }
    out.flush().await.context("Failed to flush upload spool")?;

    Ok(UploadedFile::from_temp(filename, temp).context("Failed to stat upload spool")?)
}

#[tracing::instrument(skip(state, multipart), fields(operation = "upload_media"))]
pub async fn upload_media(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), HttpAppError> {
    let limit = state.config.max_upload_size_bytes;
    let mut folder: Option<String> = None;
    let mut options = IngestOptions::default();
    let mut uploads = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(FILE_FIELD) => uploads.push(spool(field, limit).await?),
            Some(FOLDER_FIELD) => folder = Some(field.text().await?),
            Some(SKIP_CONVERSION_FIELD) => options.skip_conversion = parse_flag(&field.text().await?),
            other => tracing::debug!(field = ?other, "Ignoring multipart field"),
        }
    }

    if uploads.is_empty() {
        return Err(AppError::InvalidInput(format!("Missing '{}' field", FILE_FIELD)).into());
    }

    let folder = folder.filter(|f| !f.trim().is_empty());
    let mut media_ids = Vec::new();
    for upload in uploads {
        let ids = state
            .service
            .ingest(job_id, upload, folder.as_deref(), options)
            .await?;
        media_ids.extend(ids);
    }

    Ok((StatusCode::CREATED, Json(UploadResponse { job_id, media_ids })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_truthy_values() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(parse_flag("YES"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
