use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Stage a progress entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Thumbnails,
    Conversion,
    Archive,
}

impl ProgressPhase {
    pub const ALL: [ProgressPhase; 3] = [
        ProgressPhase::Thumbnails,
        ProgressPhase::Conversion,
        ProgressPhase::Archive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressPhase::Thumbnails => "thumbnails",
            ProgressPhase::Conversion => "conversion",
            ProgressPhase::Archive => "archive",
        }
    }
}

impl Display for ProgressPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Advisory percent-complete signal. Never used to decide completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub total: u64,
    pub percentage: f32,
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(processed: u64, total: u64) -> Self {
        let processed = processed.min(total);
        let percentage = if total == 0 {
            0.0
        } else {
            ((processed as f64 / total as f64) * 100.0) as f32
        };
        Self {
            processed,
            total,
            percentage,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_clamped_and_safe_on_empty() {
        assert_eq!(ProgressSnapshot::new(0, 0).percentage, 0.0);
        assert_eq!(ProgressSnapshot::new(15, 30).percentage, 50.0);
        let over = ProgressSnapshot::new(40, 30);
        assert_eq!(over.processed, 30);
        assert_eq!(over.percentage, 100.0);
    }
}
