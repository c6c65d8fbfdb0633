use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

use super::MediaCounts;

/// Externally visible stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Pending,
    Uploading,
    Uploaded,
    Converting,
    Ready,
    Failed,
}

impl Display for JobPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobPhase::Pending => write!(f, "pending"),
            JobPhase::Uploading => write!(f, "uploading"),
            JobPhase::Uploaded => write!(f, "uploaded"),
            JobPhase::Converting => write!(f, "converting"),
            JobPhase::Ready => write!(f, "ready"),
            JobPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Derive the phase of a job from aggregate media counts.
///
/// Rules are evaluated top to bottom and the first match wins. An empty job
/// is always `pending`, whatever the other counters say.
pub fn resolve_phase(counts: &MediaCounts) -> JobPhase {
    let MediaCounts {
        total,
        uploaded,
        converting,
        completed,
        failed,
    } = *counts;

    if total == 0 {
        return JobPhase::Pending;
    }
    if failed > 0 && completed == 0 {
        return JobPhase::Failed;
    }
    if completed == total {
        return JobPhase::Ready;
    }
    if converting > 0 || completed > 0 {
        return JobPhase::Converting;
    }
    if uploaded == total {
        return JobPhase::Uploaded;
    }
    if uploaded > 0 {
        return JobPhase::Uploading;
    }
    JobPhase::Pending
}
