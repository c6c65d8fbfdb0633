//! Guarded extraction of container archives.
//!
//! Extraction runs in two passes over the central directory. The first pass
//! validates every entry name and the declared sizes; nothing is written
//! until the whole archive passes. The second pass extracts with real byte
//! counting, since declared sizes can lie.

use mediaconv_core::sanitize::{extension_of, has_traversal, sanitize_filename, sanitize_folder_path};
use mediaconv_core::{PipelineConfig, ValidationError};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::validator::UploadValidator;

const MAX_ENTRIES: usize = 10_000;
const BUFFER_SIZE: usize = 64 * 1024;
const JUNK_FILENAMES: &[&str] = &["thumbs.db", "desktop.ini"];

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to write extracted entry: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct ContainerLimits {
    pub max_entry_size: u64,
    pub max_total_size: u64,
    pub max_entries: usize,
}

impl From<&PipelineConfig> for ContainerLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_entry_size: config.max_entry_size_bytes,
            max_total_size: config.max_archive_uncompressed_bytes,
            max_entries: MAX_ENTRIES,
        }
    }
}

/// An image pulled out of a container onto local disk.
#[derive(Debug, Clone)]
pub struct ExtractedEntry {
    /// Sanitized folder structure inside the container.
    pub folder: String,
    pub filename: String,
    /// Lowercased, without the dot.
    pub extension: String,
    pub path: PathBuf,
    pub size: u64,
}

struct PlannedEntry {
    index: usize,
    folder: String,
    filename: String,
    extension: String,
}

pub struct ContainerExtractor {
    validator: UploadValidator,
    limits: ContainerLimits,
}

/// OS and tooling droppings that are skipped rather than rejected.
pub fn is_junk_entry(name: &str) -> bool {
    let unified = name.replace('\\', "/");
    if unified.split('/').any(|segment| segment == "__MACOSX") {
        return true;
    }
    let base = unified.rsplit('/').next().unwrap_or_default();
    base.starts_with('.') || JUNK_FILENAMES.contains(&base.to_lowercase().as_str())
}

fn invalid(e: impl std::fmt::Display) -> ValidationError {
    ValidationError::InvalidArchive(e.to_string())
}

impl ContainerExtractor {
    pub fn new(validator: UploadValidator, limits: ContainerLimits) -> Self {
        Self { validator, limits }
    }

    /// Validate and extract every image of `archive_path` into `dest`.
    ///
    /// Any traversal attempt, unsupported type or size overrun fails the
    /// whole container.
    pub fn extract(&self, archive_path: &Path, dest: &Path) -> Result<Vec<ExtractedEntry>, ExtractError> {
        let file = File::open(archive_path)?;
        let mut archive = ZipArchive::new(file).map_err(invalid)?;

        if archive.len() > self.limits.max_entries {
            return Err(invalid(format!(
                "{} entries exceed the limit of {}",
                archive.len(),
                self.limits.max_entries
            ))
            .into());
        }

        let planned = self.plan(&mut archive)?;
        if planned.is_empty() {
            return Err(ValidationError::EmptyArchive.into());
        }

        self.extract_planned(&mut archive, planned, dest)
    }

    fn plan(&self, archive: &mut ZipArchive<File>) -> Result<Vec<PlannedEntry>, ValidationError> {
        let mut planned = Vec::new();
        let mut declared_total = 0u64;

        for index in 0..archive.len() {
            let entry = archive.by_index(index).map_err(invalid)?;
            let name = entry.name().to_string();

            if has_traversal(&name) || entry.enclosed_name().is_none() {
                return Err(ValidationError::PathTraversal(name));
            }
            if entry.is_dir() || is_junk_entry(&name) {
                continue;
            }

            let extension = extension_of(&name)
                .filter(|ext| self.validator.is_allowed_extension(ext))
                .ok_or_else(|| ValidationError::UnsupportedType(name.clone()))?;

            if entry.size() > self.limits.max_entry_size {
                return Err(ValidationError::EntryTooLarge {
                    name,
                    limit: self.limits.max_entry_size,
                });
            }
            declared_total = declared_total.saturating_add(entry.size());
            if declared_total > self.limits.max_total_size {
                return Err(ValidationError::ArchiveTooLarge {
                    limit: self.limits.max_total_size,
                });
            }

            let unified = name.replace('\\', "/");
            let (dir, base) = match unified.rfind('/') {
                Some(idx) => (&unified[..idx], &unified[idx + 1..]),
                None => ("", unified.as_str()),
            };

            planned.push(PlannedEntry {
                index,
                folder: sanitize_folder_path(dir),
                filename: sanitize_filename(base),
                extension,
            });
        }

        Ok(planned)
    }

    fn extract_planned(
        &self,
        archive: &mut ZipArchive<File>,
        planned: Vec<PlannedEntry>,
        dest: &Path,
    ) -> Result<Vec<ExtractedEntry>, ExtractError> {
        let mut extracted = Vec::with_capacity(planned.len());
        let mut total = 0u64;
        let mut buffer = vec![0u8; BUFFER_SIZE];

        for (n, plan) in planned.into_iter().enumerate() {
            let mut entry = archive.by_index(plan.index).map_err(invalid)?;
            // Temp names never derive from entry names.
            let path = dest.join(format!("{:06}.{}", n, plan.extension));
            let mut out = File::create(&path)?;

            let mut size = 0u64;
            loop {
                let read = entry.read(&mut buffer).map_err(invalid)?;
                if read == 0 {
                    break;
                }
                size += read as u64;
                total += read as u64;
                if size > self.limits.max_entry_size {
                    return Err(ValidationError::EntryTooLarge {
                        name: entry.name().to_string(),
                        limit: self.limits.max_entry_size,
                    }
                    .into());
                }
                if total > self.limits.max_total_size {
                    return Err(ValidationError::ArchiveTooLarge {
                        limit: self.limits.max_total_size,
                    }
                    .into());
                }
                out.write_all(&buffer[..read])?;
            }
            out.flush()?;

            extracted.push(ExtractedEntry {
                folder: plan.folder,
                filename: plan.filename,
                extension: plan.extension,
                path,
                size,
            });
        }

        Ok(extracted)
    }
}
