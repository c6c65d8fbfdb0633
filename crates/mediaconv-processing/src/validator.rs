//! Upload validation for single files and container detection.

use mediaconv_core::sanitize::{extension_of, has_traversal};
use mediaconv_core::{PipelineConfig, ValidationError};

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";

/// Checks applied to every upload before anything is stored.
#[derive(Debug, Clone)]
pub struct UploadValidator {
    allowed_extensions: Vec<String>,
    max_upload_size: u64,
}

impl UploadValidator {
    pub fn new(allowed_extensions: Vec<String>, max_upload_size: u64) -> Self {
        Self {
            allowed_extensions,
            max_upload_size,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.allowed_extensions.clone(),
            config.max_upload_size_bytes,
        )
    }

    pub fn validate_size(&self, size: u64) -> Result<(), ValidationError> {
        if size == 0 {
            return Err(ValidationError::EmptyUpload);
        }
        if size > self.max_upload_size {
            return Err(ValidationError::UploadTooLarge {
                limit: self.max_upload_size,
            });
        }
        Ok(())
    }

    /// Validate the name of an image and return its lowercased extension.
    pub fn validate_image_name(&self, name: &str) -> Result<String, ValidationError> {
        if has_traversal(name) {
            return Err(ValidationError::PathTraversal(name.to_string()));
        }
        let ext = extension_of(name)
            .ok_or_else(|| ValidationError::UnsupportedType(name.to_string()))?;
        if !self.is_allowed_extension(&ext) {
            return Err(ValidationError::UnsupportedType(name.to_string()));
        }
        Ok(ext)
    }

    pub fn is_allowed_extension(&self, ext: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e == ext)
    }
}

/// Whether an upload is a container archive rather than a single image.
pub fn is_container(filename: &str, head: &[u8]) -> bool {
    extension_of(filename).as_deref() == Some("zip")
        || head.starts_with(ZIP_LOCAL_HEADER)
        || head.starts_with(ZIP_EMPTY_ARCHIVE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> UploadValidator {
        UploadValidator::new(vec!["jpg".into(), "png".into()], 1000)
    }

    #[test]
    fn size_limits() {
        let v = validator();
        assert_eq!(v.validate_size(0), Err(ValidationError::EmptyUpload));
        assert!(v.validate_size(1000).is_ok());
        assert_eq!(
            v.validate_size(1001),
            Err(ValidationError::UploadTooLarge { limit: 1000 })
        );
    }

    #[test]
    fn image_names() {
        let v = validator();
        assert_eq!(v.validate_image_name("Photo.JPG").unwrap(), "jpg");
        assert!(matches!(
            v.validate_image_name("evil.exe"),
            Err(ValidationError::UnsupportedType(_))
        ));
        assert!(matches!(
            v.validate_image_name("noext"),
            Err(ValidationError::UnsupportedType(_))
        ));
        assert!(matches!(
            v.validate_image_name("../up.jpg"),
            Err(ValidationError::PathTraversal(_))
        ));
    }

    #[test]
    fn container_detection() {
        assert!(is_container("batch.ZIP", b""));
        assert!(is_container("upload.bin", b"PK\x03\x04rest"));
        assert!(!is_container("photo.jpg", &[0xFF, 0xD8, 0xFF]));
    }
}
