//! Transition state machine for a single monitored asset.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TimelineError;
use crate::event::EventKind;
use crate::types::AssetId;

/// The modelled state of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitorState {
    /// Nothing known yet.
    Unknown,
    Start,
    Stop,
    Offline,
    /// Was overflowing when the sensor went offline.
    PotentiallyOverflowing,
}

impl MonitorState {
    /// The transition table.
    ///
    /// Returns `None` for every move not listed, including repeats of the
    /// current state.
    pub const fn next(self, kind: EventKind) -> Option<Self> {
        match (self, kind) {
            (Self::Unknown | Self::Stop | Self::Offline | Self::PotentiallyOverflowing, EventKind::Start) => {
                Some(Self::Start)
            }
            (Self::Unknown | Self::Start | Self::Offline | Self::PotentiallyOverflowing, EventKind::Stop) => {
                Some(Self::Stop)
            }
            (Self::Unknown | Self::Stop, EventKind::Offline) => Some(Self::Offline),
            (Self::Start, EventKind::Offline) => Some(Self::PotentiallyOverflowing),
            _ => None,
        }
    }

    /// The state an asset is in after the given last event.
    ///
    /// An `Offline` event may have led to `PotentiallyOverflowing` instead;
    /// both states accept exactly the same next moves.
    pub const fn after(last: Option<EventKind>) -> Self {
        match last {
            None => Self::Unknown,
            Some(EventKind::Start) => Self::Start,
            Some(EventKind::Stop) => Self::Stop,
            Some(EventKind::Offline) => Self::Offline,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Offline => "Offline",
            Self::PotentiallyOverflowing => "Potentially Overflowing",
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates one move, returning the destination state.
pub fn transition(
    asset_id: &AssetId,
    from: MonitorState,
    kind: EventKind,
    at: DateTime<Utc>,
) -> Result<MonitorState, TimelineError> {
    from.next(kind).ok_or_else(|| TimelineError::IllegalTransition {
        asset_id: asset_id.clone(),
        from,
        kind,
        at,
    })
}

/// Tracks one asset's state across a stream of events.
#[derive(Debug, Clone)]
pub struct Monitor {
    asset_id: AssetId,
    state: MonitorState,
}

impl Monitor {
    /// Creates a monitor in the `Unknown` state.
    pub const fn new(asset_id: AssetId) -> Self {
        Self {
            asset_id,
            state: MonitorState::Unknown,
        }
    }

    pub const fn state(&self) -> MonitorState {
        self.state
    }

    /// Applies one event.
    ///
    /// On a legal move `on_transition` is called exactly once with the
    /// destination state and the event time; the state only changes if the
    /// callback succeeds.
    pub fn apply<F>(
        &mut self,
        kind: EventKind,
        at: DateTime<Utc>,
        on_transition: F,
    ) -> Result<MonitorState, TimelineError>
    where
        F: FnOnce(MonitorState, DateTime<Utc>) -> Result<(), TimelineError>,
    {
        let next = transition(&self.asset_id, self.state, kind, at)?;
        on_transition(next, at)?;
        self.state = next;
        Ok(next)
    }
}
