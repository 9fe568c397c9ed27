//! Dispatch priorities

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Ordering is `Background < Normal < Interactive`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Background = 0,
    #[default]
    Normal = 1,
    Interactive = 2,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::Normal => write!(f, "normal"),
            Self::Interactive => write!(f, "interactive"),
        }
    }
}

/// Queue position: higher priority first, then FIFO by sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueRank {
    pub priority: Priority,
    pub sequence: u64,
}

impl Ord for QueueRank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
