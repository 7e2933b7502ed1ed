//! Keeps per-asset event times strictly increasing.
//!
//! Upstream sources occasionally report a state with a timestamp earlier than
//! an event that has already been recorded for the asset. Those glitches are
//! corrected here rather than rejected: the poll is moved forward to just after
//! the previous event, and emitted times that would not advance are nudged by
//! one second.

use chrono::{DateTime, TimeDelta, Utc};

use crate::event::{Event, EventKind};
use crate::poll::RawPoll;

/// The smallest step an event time is moved forward by.
pub fn nudge() -> TimeDelta {
    TimeDelta::seconds(1)
}

/// Returns the first present candidate, in priority order.
pub fn first_time(candidates: &[Option<DateTime<Utc>>]) -> Option<DateTime<Utc>> {
    candidates.iter().flatten().next().copied()
}

/// Chooses an event time strictly after `last`.
///
/// The first present candidate wins; if there is none, or it does not move
/// past `last`, the result is `last + 1s`.
pub fn safe_time(last: DateTime<Utc>, candidates: &[Option<DateTime<Utc>>]) -> DateTime<Utc> {
    match first_time(candidates) {
        Some(chosen) if chosen > last => chosen,
        chosen => {
            let nudged = last + nudge();
            tracing::info!(
                %last,
                chosen = ?chosen,
                %nudged,
                "event time does not advance, moving forward"
            );
            nudged
        }
    }
}

/// Moves a poll's timestamps forward when it claims a changed status that
/// began before the previous event.
///
/// Returns `None` when the poll is already consistent with `previous`.
pub fn realign(previous: &Event, poll: &RawPoll) -> Option<RawPoll> {
    let status_start = poll.status_start?;
    if status_start >= previous.event_time || EventKind::from(poll.reported_status) == previous.kind
    {
        return None;
    }

    let floor = previous.event_time + nudge();
    let lift = |t: Option<DateTime<Utc>>| t.map(|t| t.max(floor));

    tracing::info!(
        asset_id = %poll.asset_id,
        status = %poll.reported_status,
        %status_start,
        previous = %previous.event_time,
        "poll moves backwards, realigning timestamps"
    );

    Some(RawPoll {
        status_start: lift(poll.status_start),
        latest_event_start: lift(poll.latest_event_start),
        latest_event_end: lift(poll.latest_event_end),
        last_updated: lift(poll.last_updated),
        ..poll.clone()
    })
}
