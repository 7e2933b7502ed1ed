//! Synthetic stops for assets a source has stopped reporting.
//!
//! Some operators drop an asset from their feed instead of reporting it as
//! stopped. Without intervention such an asset would stay in its last state
//! indefinitely.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::poll::{PollStatus, RawPoll};
use crate::store::PollBatch;
use crate::types::{AssetId, BatchId, SourceId};

/// How long an asset may go unreported before it is stopped.
pub const DEFAULT_SILENCE_GAP: TimeDelta = TimeDelta::weeks(3);

/// Builds a batch of Stop polls for every asset last seen before
/// `latest_poll_time - silence_gap`.
///
/// Each stop is dated `last_seen + silence_gap`. The batch itself is stamped
/// one millisecond after `latest_poll_time` so it sorts after every real
/// batch. Returns `None` when no asset has gone silent.
pub fn synthesize_stops(
    source_id: &SourceId,
    last_seen: &HashMap<AssetId, DateTime<Utc>>,
    latest_poll_time: DateTime<Utc>,
    silence_gap: TimeDelta,
) -> Option<PollBatch> {
    let silent_before = latest_poll_time - silence_gap;
    let poll_time = latest_poll_time + TimeDelta::milliseconds(1);
    let batch_id = BatchId::new(format!("silence-{}", poll_time.format("%Y%m%dT%H%M%S%.3fZ"))).ok()?;

    let mut polls: Vec<RawPoll> = last_seen
        .iter()
        .filter(|&(_, &seen)| seen < silent_before)
        .map(|(asset_id, &seen)| {
            let stopped = Some(seen + silence_gap);
            RawPoll {
                asset_id: asset_id.clone(),
                source_id: source_id.clone(),
                batch_id: batch_id.clone(),
                reported_status: PollStatus::Stop,
                status_start: stopped,
                latest_event_start: stopped,
                latest_event_end: stopped,
                last_updated: stopped,
                poll_time,
            }
        })
        .collect();

    if polls.is_empty() {
        return None;
    }
    polls.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));

    tracing::info!(
        %source_id,
        assets = polls.len(),
        silence_gap_days = silence_gap.num_days(),
        "stopping silent assets"
    );

    Some(PollBatch {
        source_id: source_id.clone(),
        batch_id,
        poll_time,
        polls,
    })
}
