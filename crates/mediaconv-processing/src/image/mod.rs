//! Image processing module
//!
//! - `pipeline`: decode, flatten, downscale, orient and re-encode
//! - `orientation`: EXIF orientation lookup and correction
//! - `encode`: progressive JPEG output through mozjpeg

pub mod encode;
pub mod orientation;
pub mod pipeline;

pub use orientation::ImageOrientation;
pub use pipeline::{ImagePipeline, PipelineSettings};
