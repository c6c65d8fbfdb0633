use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Per-media conversion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Pending,
    Converting,
    Completed,
    Failed,
}

impl MediaStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MediaStatus::Completed | MediaStatus::Failed)
    }
}

impl Display for MediaStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaStatus::Pending => write!(f, "pending"),
            MediaStatus::Converting => write!(f, "converting"),
            MediaStatus::Completed => write!(f, "completed"),
            MediaStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for MediaStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MediaStatus::Pending),
            "converting" => Ok(MediaStatus::Converting),
            "completed" => Ok(MediaStatus::Completed),
            "failed" => Ok(MediaStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid media status: {}", s)),
        }
    }
}

/// Named derived artifact of a media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rendition {
    ThumbSmall,
    ThumbLarge,
    Converted,
}

impl Rendition {
    pub const ALL: [Rendition; 3] = [
        Rendition::ThumbSmall,
        Rendition::ThumbLarge,
        Rendition::Converted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Rendition::ThumbSmall => "thumb_small",
            Rendition::ThumbLarge => "thumb_large",
            Rendition::Converted => "converted",
        }
    }
}

impl Display for Rendition {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rendition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumb_small" => Ok(Rendition::ThumbSmall),
            "thumb_large" => Ok(Rendition::ThumbLarge),
            "converted" => Ok(Rendition::Converted),
            _ => Err(anyhow::anyhow!("Invalid rendition: {}", s)),
        }
    }
}

/// Which renditions currently exist for a media item.
///
/// Status reads consult this instead of probing the blob store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenditionManifest(BTreeSet<Rendition>);

impl RenditionManifest {
    pub fn has(&self, rendition: Rendition) -> bool {
        self.0.contains(&rendition)
    }

    pub fn insert(&mut self, rendition: Rendition) {
        self.0.insert(rendition);
    }

    pub fn extend(&mut self, renditions: impl IntoIterator<Item = Rendition>) {
        self.0.extend(renditions);
    }

    pub fn has_thumbnails(&self) -> bool {
        self.has(Rendition::ThumbSmall) && self.has(Rendition::ThumbLarge)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Rendition> + '_ {
        self.0.iter().copied()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|r| r.as_str().to_string()).collect()
    }

    /// Parse the text-array form used by the row store; unknown names are dropped.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self(
            names
                .iter()
                .filter_map(|n| n.as_ref().parse::<Rendition>().ok())
                .collect(),
        )
    }
}

/// Worker precondition used when claiming media rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// Uploaded, still pending, no thumbnails yet.
    Thumbnail,
    /// Thumbnails present, not yet normalized.
    Conversion,
}

impl Display for ClaimKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ClaimKind::Thumbnail => write!(f, "thumbnail"),
            ClaimKind::Conversion => write!(f, "conversion"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionMedia {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Insertion order within the row store; claims are ordered by it.
    pub seq: i64,
    /// Sanitized relative folder path, `/`-separated, possibly empty.
    pub folder_path: String,
    pub original_filename: String,
    pub original_key: String,
    pub size_bytes: u64,
    pub conversion_status: MediaStatus,
    /// Set at ingestion when the caller asked to skip re-encoding.
    pub fast_path: bool,
    pub manifest: RenditionManifest,
    pub claim_token: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub upload_completed_at: Option<DateTime<Utc>>,
    pub conversion_started_at: Option<DateTime<Utc>>,
    pub conversion_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ConversionMedia {
    /// Whether this row matches a worker precondition, ignoring claims.
    pub fn matches(&self, kind: ClaimKind) -> bool {
        match kind {
            ClaimKind::Thumbnail => {
                self.conversion_status == MediaStatus::Pending && !self.manifest.has_thumbnails()
            }
            ClaimKind::Conversion => {
                matches!(
                    self.conversion_status,
                    MediaStatus::Pending | MediaStatus::Converting
                ) && self.manifest.has_thumbnails()
                    && !self.manifest.has(Rendition::Converted)
            }
        }
    }

    /// Whether the row still counts as remaining work for a phase.
    ///
    /// Broader than [`matches`](Self::matches): claimed rows in flight count,
    /// and conversion also waits on rows whose thumbnails are not done yet.
    pub fn is_outstanding(&self, kind: ClaimKind) -> bool {
        match kind {
            ClaimKind::Thumbnail => self.matches(kind),
            ClaimKind::Conversion => matches!(
                self.conversion_status,
                MediaStatus::Pending | MediaStatus::Converting
            ),
        }
    }

    /// Whether the current claim (if any) no longer protects the row.
    pub fn claim_expired(&self, cutoff: DateTime<Utc>) -> bool {
        match (self.claim_token, self.claimed_at) {
            (None, _) => true,
            (Some(_), Some(at)) => at < cutoff,
            (Some(_), None) => true,
        }
    }
}

/// Row to insert at ingestion time.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub job_id: Uuid,
    pub folder_path: String,
    pub original_filename: String,
    pub original_key: String,
    pub size_bytes: u64,
    pub fast_path: bool,
}

/// Result of processing a claimed item.
#[derive(Debug, Clone)]
pub enum MediaOutcome {
    /// Thumbnail stage finished; row stays pending for conversion.
    Thumbnailed { renditions: Vec<Rendition> },
    Completed { renditions: Vec<Rendition> },
    Failed { error: String },
}

/// Aggregate counts feeding the phase resolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCounts {
    pub total: u64,
    pub uploaded: u64,
    pub converting: u64,
    pub completed: u64,
    pub failed: u64,
}

impl MediaCounts {
    pub fn tally<'a>(media: impl IntoIterator<Item = &'a ConversionMedia>) -> Self {
        let mut counts = MediaCounts::default();
        for m in media {
            counts.total += 1;
            if m.upload_completed_at.is_some() {
                counts.uploaded += 1;
            }
            match m.conversion_status {
                MediaStatus::Converting => counts.converting += 1,
                MediaStatus::Completed => counts.completed += 1,
                MediaStatus::Failed => counts.failed += 1,
                MediaStatus::Pending => {}
            }
        }
        counts
    }
}

/// Per-item line of a status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSummary {
    pub id: Uuid,
    pub folder_path: String,
    pub filename: String,
    pub status: MediaStatus,
    pub renditions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ConversionMedia> for MediaSummary {
    fn from(media: &ConversionMedia) -> Self {
        Self {
            id: media.id,
            folder_path: media.folder_path.clone(),
            filename: media.original_filename.clone(),
            status: media.conversion_status,
            renditions: media.manifest.names(),
            error: media.error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(status: MediaStatus, renditions: &[Rendition]) -> ConversionMedia {
        let mut manifest = RenditionManifest::default();
        manifest.extend(renditions.iter().copied());
        ConversionMedia {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            seq: 1,
            folder_path: String::new(),
            original_filename: "a.jpg".to_string(),
            original_key: "k".to_string(),
            size_bytes: 1,
            conversion_status: status,
            fast_path: false,
            manifest,
            claim_token: None,
            claimed_at: None,
            error_message: None,
            upload_completed_at: Some(Utc::now()),
            conversion_started_at: None,
            conversion_completed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn thumbnail_precondition() {
        assert!(media(MediaStatus::Pending, &[]).matches(ClaimKind::Thumbnail));
        assert!(!media(
            MediaStatus::Pending,
            &[Rendition::ThumbSmall, Rendition::ThumbLarge]
        )
        .matches(ClaimKind::Thumbnail));
        assert!(!media(MediaStatus::Failed, &[]).matches(ClaimKind::Thumbnail));
    }

    #[test]
    fn conversion_precondition_requires_thumbnails() {
        let thumbs = [Rendition::ThumbSmall, Rendition::ThumbLarge];
        assert!(media(MediaStatus::Pending, &thumbs).matches(ClaimKind::Conversion));
        assert!(!media(MediaStatus::Pending, &[]).matches(ClaimKind::Conversion));
        assert!(!media(MediaStatus::Completed, &thumbs).matches(ClaimKind::Conversion));
        let done = [
            Rendition::ThumbSmall,
            Rendition::ThumbLarge,
            Rendition::Converted,
        ];
        assert!(!media(MediaStatus::Converting, &done).matches(ClaimKind::Conversion));
    }

    #[test]
    fn manifest_parses_known_names_only() {
        let manifest = RenditionManifest::from_names(&["thumb_small", "bogus", "converted"]);
        assert!(manifest.has(Rendition::ThumbSmall));
        assert!(manifest.has(Rendition::Converted));
        assert!(!manifest.has(Rendition::ThumbLarge));
        assert_eq!(manifest.names(), vec!["thumb_small", "converted"]);
    }

    #[test]
    fn tally_counts_each_status() {
        let rows = vec![
            media(MediaStatus::Pending, &[]),
            media(MediaStatus::Converting, &[]),
            media(MediaStatus::Completed, &[]),
            media(MediaStatus::Failed, &[]),
        ];
        let counts = MediaCounts::tally(&rows);
        assert_eq!(
            counts,
            MediaCounts {
                total: 4,
                uploaded: 4,
                converting: 1,
                completed: 1,
                failed: 1,
            }
        );
    }
}
