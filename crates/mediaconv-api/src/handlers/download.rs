//! Archive download handler.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::HttpAppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// Archive root folder and file name; defaults to the job name.
    pub name: Option<String>,
}

/// `Content-Disposition` with an ASCII fallback and the UTF-8 name.
fn content_disposition(filename: &str) -> HeaderValue {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC);
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii, encoded
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[tracing::instrument(skip(state), fields(operation = "download"))]
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, HttpAppError> {
    let archive = state.service.download(id, query.name).await?;

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
        (header::CONTENT_DISPOSITION, content_disposition(&archive.filename)),
    ];
    Ok((headers, Body::from_stream(archive.stream)).into_response())
}
