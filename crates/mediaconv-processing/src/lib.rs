//! mediaconv processing library
//!
//! Image normalization and rendition generation, upload validation, and
//! guarded extraction of container archives.

pub mod container;
pub mod fetch;
pub mod image;
pub mod validator;

pub use container::{ContainerExtractor, ContainerLimits, ExtractError, ExtractedEntry};
pub use fetch::fetch_to_tempfile;
pub use crate::image::{ImagePipeline, PipelineSettings};
pub use validator::UploadValidator;
