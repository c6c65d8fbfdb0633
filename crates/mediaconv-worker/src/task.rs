use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// A unit of background work. Every task targets exactly one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Thumbnails { job_id: Uuid },
    Conversion { job_id: Uuid },
    Deletion { job_id: Uuid },
}

impl Task {
    pub fn job_id(&self) -> Uuid {
        match self {
            Task::Thumbnails { job_id } | Task::Conversion { job_id } | Task::Deletion { job_id } => {
                *job_id
            }
        }
    }

    pub fn task_type(&self) -> &'static str {
        match self {
            Task::Thumbnails { .. } => "thumbnails",
            Task::Conversion { .. } => "conversion",
            Task::Deletion { .. } => "deletion",
        }
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", self.task_type(), self.job_id())
    }
}
