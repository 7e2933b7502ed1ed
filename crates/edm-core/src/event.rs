//! Interpreted state-transition events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::poll::PollStatus;
use crate::types::{AssetId, BatchId};

/// The kind of transition an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Start,
    Stop,
    Offline,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Offline => "Offline",
        }
    }
}

impl From<PollStatus> for EventKind {
    fn from(status: PollStatus) -> Self {
        match status {
            PollStatus::Start => Self::Start,
            PollStatus::Stop => Self::Stop,
            PollStatus::Offline => Self::Offline,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A derived, timestamped state transition for one asset.
///
/// Events are append-only. For a given asset, `event_time` is strictly
/// increasing and consecutive events never share a kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub asset_id: AssetId,
    pub kind: EventKind,
    pub event_time: DateTime<Utc>,
    /// The batch the event was derived from.
    pub source_batch_id: BatchId,
    /// When the source last confirmed this state.
    pub observed_at: DateTime<Utc>,
}
