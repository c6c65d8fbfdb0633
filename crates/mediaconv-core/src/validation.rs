//! Ingestion-time validation failures.
//!
//! These are raised synchronously while an upload is inspected; none of them
//! leaves a trace in the row store.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Entry path escapes the archive: {0}")]
    PathTraversal(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Entry {name} exceeds the per-file limit of {limit} bytes")]
    EntryTooLarge { name: String, limit: u64 },

    #[error("Archive expands beyond the limit of {limit} bytes")]
    ArchiveTooLarge { limit: u64 },

    #[error("Upload exceeds the limit of {limit} bytes")]
    UploadTooLarge { limit: u64 },

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Archive contains no supported images")]
    EmptyArchive,

    #[error("Empty upload")]
    EmptyUpload,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::PathTraversal(_) => "PATH_TRAVERSAL",
            ValidationError::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            ValidationError::EntryTooLarge { .. } => "ENTRY_TOO_LARGE",
            ValidationError::ArchiveTooLarge { .. } => "ARCHIVE_TOO_LARGE",
            ValidationError::UploadTooLarge { .. } => "UPLOAD_TOO_LARGE",
            ValidationError::InvalidArchive(_) => "INVALID_ARCHIVE",
            ValidationError::EmptyArchive => "EMPTY_ARCHIVE",
            ValidationError::EmptyUpload => "EMPTY_UPLOAD",
        }
    }

    pub fn is_size_limit(&self) -> bool {
        matches!(
            self,
            ValidationError::EntryTooLarge { .. }
                | ValidationError::ArchiveTooLarge { .. }
                | ValidationError::UploadTooLarge { .. }
        )
    }
}
