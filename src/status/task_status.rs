//! Task statuses and the write tier each one is persisted through

use crate::error::CourierError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Pending,
    Downloading,
    Uploading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// How a transition is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteTier {
    /// Held in the pending buffer until the next flush
    Buffered,
    /// Written to the fast cache tier with a bounded TTL
    Fast,
    /// Written synchronously to the durable store
    Durable,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Queued,
        TaskStatus::Pending,
        TaskStatus::Downloading,
        TaskStatus::Uploading,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn write_tier(&self) -> WriteTier {
        match self {
            Self::Queued | Self::Pending => WriteTier::Buffered,
            Self::Downloading | Self::Uploading | Self::Processing => WriteTier::Fast,
            Self::Completed | Self::Failed | Self::Cancelled => WriteTier::Durable,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.write_tier() == WriteTier::Durable
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| CourierError::ValidationError(format!("Unknown task status: {s}")))
    }
}
