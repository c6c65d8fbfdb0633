//! Path and file name sanitization for ingestion and archive output.
//!
//! Folder paths keep accented characters (normalized to NFC) and only lose
//! separators-in-disguise and control characters. File names additionally
//! lose a fixed denylist of characters that archive tools choke on.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use unicode_normalization::UnicodeNormalization;

const MAX_FILENAME_LENGTH: usize = 255;
const FOLDER_DENYLIST: &[char] = &['<', '>', ':', '"', '|', '?', '*'];
const FILENAME_DENYLIST: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];
const FALLBACK_FILENAME: &str = "unnamed";

/// Whether a raw entry path tries to escape its root.
///
/// Catches `..` components, absolute paths, Windows drive letters and UNC
/// prefixes, with either separator.
pub fn has_traversal(raw: &str) -> bool {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') {
        return true;
    }
    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return true;
    }
    normalized.split('/').any(|segment| segment == "..")
}

fn clean_segment(segment: &str) -> String {
    segment
        .chars()
        .filter(|c| !c.is_control() && !FOLDER_DENYLIST.contains(c))
        .collect::<String>()
        .trim()
        .trim_end_matches('.')
        .trim()
        .to_string()
}

/// Normalize a relative folder path into `a/b/c` form.
///
/// Empty, `.` and `..` segments are dropped, so the result never climbs out
/// of its root even when fed hostile input.
pub fn sanitize_folder_path(raw: &str) -> String {
    let composed: String = raw.nfc().collect();
    composed
        .replace('\\', "/")
        .split('/')
        .filter(|s| *s != "." && *s != "..")
        .map(clean_segment)
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join folder paths, sanitizing each part.
pub fn join_folder_paths<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(sanitize_folder_path)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Strip archive-unsafe characters from a bare file name.
///
/// Only the last path component is kept; names that end up empty or made of
/// dots fall back to `unnamed`.
pub fn sanitize_filename(raw: &str) -> String {
    let composed: String = raw.nfc().collect();
    let unified = composed.replace('\\', "/");
    let base = unified.rsplit('/').next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && !FILENAME_DENYLIST.contains(c))
        .take(MAX_FILENAME_LENGTH)
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return FALLBACK_FILENAME.to_string();
    }
    cleaned.to_string()
}

/// Split `name.ext` into (`name`, `.ext`); dot-files keep their name whole.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Lowercased extension without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Hands out collision-free names within each folder.
///
/// Comparison is case-insensitive. The first claimant keeps the name, later
/// ones get ` (1)`, ` (2)`, ... inserted before the extension.
#[derive(Debug, Default)]
pub struct UniqueNamer {
    taken: HashMap<String, HashSet<String>>,
}

impl UniqueNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, folder: &str, filename: &str) -> String {
        let taken = self.taken.entry(folder.to_lowercase()).or_default();
        if taken.insert(filename.to_lowercase()) {
            return filename.to_string();
        }

        let (stem, ext) = split_extension(filename);
        let mut n = 1u32;
        loop {
            let candidate = with_counter(stem, ext, n);
            if taken.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// `stem (n).ext`, shortening the stem so the result stays within
/// `MAX_FILENAME_LENGTH` characters.
fn with_counter(stem: &str, ext: &str, n: u32) -> String {
    let counter = format!(" ({})", n);
    let budget = MAX_FILENAME_LENGTH.saturating_sub(counter.chars().count());
    let ext: String = ext.chars().take(budget).collect();
    let stem: String = stem
        .chars()
        .take(budget - ext.chars().count())
        .collect();
    format!("{}{}{}", stem, counter, ext)
}
