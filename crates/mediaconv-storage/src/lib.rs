//! mediaconv storage library
//!
//! Blob-store abstraction and the local filesystem backend.
//!
//! # Storage key format
//!
//! All keys are job-scoped so a job can be torn down by walking its media:
//!
//! - originals: `jobs/{job_id}/originals/{media_id}.{ext}`
//! - renditions: `jobs/{job_id}/renditions/{media_id}/{rendition}.jpg`
//!
//! Keys must not contain `..` or a leading `/`. Key generation lives in the
//! `keys` module so every caller agrees on the layout.

pub mod keys;
pub mod local;
pub mod traits;

pub use local::LocalStorage;
pub use traits::{ByteStream, Storage, StorageError, StorageResult};
