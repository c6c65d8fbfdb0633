use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Stored lifecycle status of a job.
///
/// Status only moves forward (`pending → uploading → uploaded → converting →
/// completed`); `failed` is reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Uploading,
    Uploaded,
    Converting,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Uploading => 1,
            JobStatus::Uploaded => 2,
            JobStatus::Converting => 3,
            JobStatus::Completed => 4,
            JobStatus::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a stored status may be replaced by `next`.
    ///
    /// Re-entering the current status is allowed so that repeated
    /// observations (retries, overlapping chunks) stay no-ops.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == JobStatus::Failed || next.rank() > self.rank()
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Uploading => write!(f, "uploading"),
            JobStatus::Uploaded => write!(f, "uploaded"),
            JobStatus::Converting => write!(f, "converting"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "uploading" => Ok(JobStatus::Uploading),
            "uploaded" => Ok(JobStatus::Uploaded),
            "converting" => Ok(JobStatus::Converting),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// A batch of media converted and delivered together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub id: Uuid,
    pub name: Option<String>,
    pub status: JobStatus,
    pub total_count: u64,
    pub processed_count: u64,
    /// Durable guard set by `deleteJob` before teardown starts.
    pub deletion_in_progress: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversionJob {
    pub fn new(name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.filter(|n| !n.trim().is_empty()),
            status: JobStatus::Pending,
            total_count: 0,
            processed_count: 0,
            deletion_in_progress: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Name shown to users and used as the archive root folder.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("conversion-{}", &self.id.simple().to_string()[..8]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Uploading));
        assert!(JobStatus::Uploading.can_transition_to(JobStatus::Uploaded));
        assert!(JobStatus::Uploaded.can_transition_to(JobStatus::Converting));
        assert!(JobStatus::Converting.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Uploading.can_transition_to(JobStatus::Converting));
    }

    #[test]
    fn backward_transitions_are_rejected() {
        assert!(!JobStatus::Converting.can_transition_to(JobStatus::Uploaded));
        assert!(!JobStatus::Uploaded.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Converting));
    }

    #[test]
    fn failure_reachable_only_from_non_terminal() {
        for status in [
            JobStatus::Pending,
            JobStatus::Uploading,
            JobStatus::Uploaded,
            JobStatus::Converting,
        ] {
            assert!(status.can_transition_to(JobStatus::Failed), "{status}");
        }
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn same_status_is_a_noop_transition() {
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Completed.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [JobStatus::Pending, JobStatus::Converting, JobStatus::Failed] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("ready".parse::<JobStatus>().is_err());
    }

    #[test]
    fn blank_names_fall_back_to_generated_display_name() {
        let job = ConversionJob::new(Some("   ".to_string()));
        assert!(job.name.is_none());
        assert!(job.display_name().starts_with("conversion-"));

        let job = ConversionJob::new(Some("Mariage Élodie".to_string()));
        assert_eq!(job.display_name(), "Mariage Élodie");
    }
}
