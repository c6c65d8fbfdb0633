/// Multipart field carrying an image or a zip container.
pub const FILE_FIELD: &str = "file";
/// Optional multipart field: folder to place the upload under.
pub const FOLDER_FIELD: &str = "folder";
/// Optional multipart field: `true` ships originals without re-encoding.
pub const SKIP_CONVERSION_FIELD: &str = "skip_conversion";

/// Extra room over the upload limit for multipart framing and text fields.
pub const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;
