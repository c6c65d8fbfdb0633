//! mediaconv services
//!
//! Ingestion, archive delivery and the [`ConversionService`] facade that
//! the HTTP layer calls.

pub mod archive;
pub mod conversion;
pub mod ingestion;

pub use archive::{ArchiveBuilder, ArchiveEntry, ArchiveStream};
pub use conversion::{ArchiveDownload, ConversionService, JobStatusReport};
pub use ingestion::{IngestError, IngestOptions, IngestionService, UploadedFile};
