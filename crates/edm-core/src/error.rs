//! Fatal timeline errors.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use thiserror::Error;

use crate::event::EventKind;
use crate::machine::MonitorState;
use crate::poll::PollStatus;
use crate::types::{AssetId, SourceId};

/// Errors that abort processing of one asset's stream.
///
/// None of these are recovered from inside the engine: each signals either
/// upstream data outside the known quirks or a defect in the engine itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineError {
    /// The interpreted event is not a legal move from the asset's state.
    #[error("illegal transition for {asset_id}: {kind} from {from} at {at}")]
    IllegalTransition {
        asset_id: AssetId,
        from: MonitorState,
        kind: EventKind,
        at: DateTime<Utc>,
    },

    /// The first poll for an asset carried no usable timestamp.
    #[error("no usable timestamp to seed {status} event for {asset_id} from {source_id}")]
    UnresolvedTimestamp {
        asset_id: AssetId,
        source_id: SourceId,
        status: PollStatus,
    },

    /// A calendar was asked to move its cursor backwards.
    #[error("events must be in sequence: cursor at {last}, got {at}")]
    SequenceViolation {
        last: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// More than a day's worth of time landed in one day bucket.
    #[error("day bucket {date} over-allocated: {}s", total.num_seconds())]
    OverAllocation { date: NaiveDate, total: TimeDelta },

    /// A poll arrived from a source with no configured strategy.
    #[error("no interpretation strategy registered for source {source_id}")]
    UnknownSource { source_id: SourceId },
}
