//! HTTP error body.
//!
//! `IntoResponse` for `AppError` lives in the API crate; orphan rules keep it
//! out of here.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}
