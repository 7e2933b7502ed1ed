//! Per-source interpretation of raw polls into events.
//!
//! Operators disagree about which timestamp describes a stop. Every source is
//! assigned one of two strategies:
//!
//! - [`Strategy::Type1`]: `status_start` is authoritative; a stop without one
//!   is placed at the batch time.
//! - [`Strategy::Type2`]: a stop after a start is placed at the later of
//!   `status_start` and `latest_event_end`, falling back to
//!   `latest_event_start`, then `last_updated`.
//!
//! Starts and offline reports are handled identically by both.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TimelineError;
use crate::event::{Event, EventKind};
use crate::poll::RawPoll;
use crate::sequence::{first_time, safe_time};
use crate::types::{SourceId, ValidationError};

/// Which timestamp semantics a source follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Timestamp-authoritative on start.
    #[serde(rename = "type-1")]
    Type1,
    /// Timestamp-authoritative on end.
    #[serde(rename = "type-2")]
    Type2,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Type1 => "type-1",
            Self::Type2 => "type-2",
        }
    }

    /// Interprets one poll relative to the asset's previous event.
    ///
    /// Returns `Ok(None)` when the poll repeats the previous kind. Emitted
    /// events are always strictly later than `previous`.
    pub fn interpret(
        self,
        previous: Option<&Event>,
        poll: &RawPoll,
    ) -> Result<Option<Event>, TimelineError> {
        let kind = EventKind::from(poll.reported_status);
        if previous.is_some_and(|p| p.kind == kind) {
            return Ok(None);
        }

        let candidates = self.candidates(kind, previous, poll);
        let event_time = match previous {
            Some(prev) => safe_time(prev.event_time, &candidates),
            None => first_time(&candidates).ok_or_else(|| TimelineError::UnresolvedTimestamp {
                asset_id: poll.asset_id.clone(),
                source_id: poll.source_id.clone(),
                status: poll.reported_status,
            })?,
        };

        Ok(Some(Event {
            asset_id: poll.asset_id.clone(),
            kind,
            event_time,
            source_batch_id: poll.batch_id.clone(),
            observed_at: observed_at(poll),
        }))
    }

    /// Candidate event times in priority order.
    fn candidates(
        self,
        kind: EventKind,
        previous: Option<&Event>,
        poll: &RawPoll,
    ) -> Vec<Option<DateTime<Utc>>> {
        // The batch time only stands in once the asset has history, except for
        // stops, which a source may report with no times at all.
        let batch_time = previous.map(|_| poll.poll_time);

        match (kind, self, previous) {
            (EventKind::Stop, Self::Type2, Some(_)) => vec![
                stop_end(poll),
                poll.latest_event_start,
                poll.last_updated,
                Some(poll.poll_time),
            ],
            (EventKind::Stop, _, _) => vec![poll.status_start, Some(poll.poll_time)],
            // A start is only ever seeded from its own status time.
            (EventKind::Start, _, None) => vec![poll.status_start],
            (EventKind::Start | EventKind::Offline, _, _) => {
                vec![poll.status_start, poll.last_updated, batch_time]
            }
        }
    }
}

/// The later of the two stop times a type-2 source offers.
fn stop_end(poll: &RawPoll) -> Option<DateTime<Utc>> {
    match (poll.status_start, poll.latest_event_end) {
        (Some(start), Some(end)) => {
            if start != end {
                tracing::info!(
                    asset_id = %poll.asset_id,
                    source_id = %poll.source_id,
                    status_start = %start,
                    latest_event_end = %end,
                    "stop times disagree, using the later"
                );
            }
            Some(start.max(end))
        }
        (start, end) => start.or(end),
    }
}

/// When the source last confirmed the reported state.
fn observed_at(poll: &RawPoll) -> DateTime<Utc> {
    poll.last_updated
        .filter(|_| poll.status_start.is_some())
        .unwrap_or(poll.poll_time)
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "type-1" | "type1" => Ok(Self::Type1),
            "type-2" | "type2" => Ok(Self::Type2),
            _ => Err(ValidationError::UnknownStrategy {
                value: s.to_string(),
            }),
        }
    }
}

/// Static configuration for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub strategy: Strategy,
    /// Polls taken before this instant are discarded before interpretation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
}

impl SourceProfile {
    pub const fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            valid_from: None,
        }
    }

    #[must_use]
    pub const fn valid_from(mut self, cutoff: DateTime<Utc>) -> Self {
        self.valid_from = Some(cutoff);
        self
    }

    /// The validity predicate applied before interpretation.
    pub fn accepts(&self, poll: &RawPoll) -> bool {
        self.valid_from.is_none_or(|cutoff| poll.poll_time >= cutoff)
    }
}

/// Maps each source to its strategy. Not mutated once processing starts.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    profiles: HashMap<SourceId, SourceProfile>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a source.
    #[must_use]
    pub fn with_source(mut self, source_id: SourceId, profile: SourceProfile) -> Self {
        self.profiles.insert(source_id, profile);
        self
    }

    pub fn profile(&self, source_id: &SourceId) -> Option<&SourceProfile> {
        self.profiles.get(source_id)
    }

    /// Whether a poll survives its source's validity predicate.
    ///
    /// Polls from unregistered sources pass here and fail in
    /// [`interpret`](Self::interpret).
    pub fn accepts(&self, poll: &RawPoll) -> bool {
        self.profile(&poll.source_id)
            .is_none_or(|profile| profile.accepts(poll))
    }

    /// Interprets a poll with its source's strategy.
    pub fn interpret(
        &self,
        previous: Option<&Event>,
        poll: &RawPoll,
    ) -> Result<Option<Event>, TimelineError> {
        let profile = self
            .profile(&poll.source_id)
            .ok_or_else(|| TimelineError::UnknownSource {
                source_id: poll.source_id.clone(),
            })?;
        profile.strategy.interpret(previous, poll)
    }
}

impl FromIterator<(SourceId, SourceProfile)> for SourceRegistry {
    fn from_iter<I: IntoIterator<Item = (SourceId, SourceProfile)>>(iter: I) -> Self {
        Self {
            profiles: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    use crate::poll::PollStatus;
    use crate::types::{AssetId, BatchId};

    fn ts(s: &str) -> Option<DateTime<Utc>> {
        if s.is_empty() {
            return None;
        }
        Some(
            DateTime::parse_from_rfc3339(s)
                .expect("valid test timestamp")
                .with_timezone(&Utc),
        )
    }

    fn batch_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 4, 12, 0, 0).unwrap()
    }

    /// `status,status_start,latest_event_start,latest_event_end`
    fn poll(source: &str, row: &str) -> RawPoll {
        let cols: Vec<&str> = row.split(',').collect();
        RawPoll {
            asset_id: AssetId::new("cso-id").unwrap(),
            source_id: SourceId::new(source).unwrap(),
            batch_id: BatchId::new("1234").unwrap(),
            reported_status: cols[0].parse().unwrap(),
            status_start: ts(cols[1]),
            latest_event_start: ts(cols[2]),
            latest_event_end: ts(cols[3]),
            last_updated: ts("2025-01-04T11:59:00Z"),
            poll_time: batch_time(),
        }
    }

    fn registry() -> SourceRegistry {
        SourceRegistry::new()
            .with_source(
                SourceId::new("anglian").unwrap(),
                SourceProfile::new(Strategy::Type1),
            )
            .with_source(
                SourceId::new("southern").unwrap(),
                SourceProfile::new(Strategy::Type2),
            )
    }

    fn apply(source: &str, rows: &[&str]) -> Vec<Event> {
        let registry = registry();
        let mut previous: Option<Event> = None;
        let mut out = Vec::new();
        for row in rows {
            if let Some(event) = registry.interpret(previous.as_ref(), &poll(source, row)).unwrap() {
                previous = Some(event.clone());
                out.push(event);
            }
        }
        out
    }

    fn times(events: &[Event]) -> Vec<(EventKind, DateTime<Utc>)> {
        events.iter().map(|e| (e.kind, e.event_time)).collect()
    }

    #[test]
    fn type1_stop_start_stop() {
        let events = apply(
            "anglian",
            &[
                "Stop,2024-12-30T11:35:57Z,2024-12-30T11:30:34Z,2024-12-30T11:35:57Z",
                "Start,2025-01-01T11:45:38Z,2025-01-01T11:45:38Z,",
                "Stop,2025-01-03T01:15:24Z,2025-01-01T11:45:38Z,2025-01-03T01:15:24Z",
            ],
        );
        assert_eq!(
            times(&events),
            vec![
                (EventKind::Stop, ts("2024-12-30T11:35:57Z").unwrap()),
                (EventKind::Start, ts("2025-01-01T11:45:38Z").unwrap()),
                (EventKind::Stop, ts("2025-01-03T01:15:24Z").unwrap()),
            ]
        );
    }

    #[test]
    fn type1_initial_stop_without_times_uses_batch_time() {
        let events = apply("anglian", &["Stop,,,"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_time, batch_time());
        assert_eq!(events[0].observed_at, batch_time());
    }

    #[test]
    fn type1_repeated_stops_collapse() {
        let events = apply(
            "anglian",
            &[
                "Stop,2024-12-31T14:30:27Z,2024-12-31T14:30:27Z,2024-12-31T14:30:27Z",
                "Stop,2024-12-31T18:45:57Z,2024-12-31T18:45:57Z,2024-12-31T18:45:57Z",
                "Stop,2024-12-31T20:04:16Z,2024-12-31T20:01:41Z,2024-12-31T20:04:16Z",
            ],
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn type1_repeated_starts_collapse_until_stop() {
        let events = apply(
            "anglian",
            &[
                "Start,2025-01-02T00:16:05Z,2025-01-02T00:16:05Z,",
                "Start,2025-01-02T00:46:08Z,2025-01-02T00:46:08Z,",
                "Start,2025-01-02T01:16:16Z,2025-01-02T01:16:16Z,",
                "Stop,2025-01-02T01:31:23Z,2025-01-02T01:16:16Z,2025-01-02T01:31:23Z",
            ],
        );
        assert_eq!(
            times(&events),
            vec![
                (EventKind::Start, ts("2025-01-02T00:16:05Z").unwrap()),
                (EventKind::Stop, ts("2025-01-02T01:31:23Z").unwrap()),
            ]
        );
    }

    #[test]
    fn initial_offline_is_emitted_then_suppressed() {
        let events = apply(
            "anglian",
            &["Offline,2024-03-01T00:00:00Z,,", "Offline,2024-03-02T00:00:00Z,,"],
        );
        assert_eq!(
            times(&events),
            vec![(EventKind::Offline, ts("2024-03-01T00:00:00Z").unwrap())]
        );
    }

    #[test]
    fn type2_stop_prefers_later_end() {
        let events = apply(
            "southern",
            &[
                "Stop,2024-11-27T07:00:00Z,2024-11-27T07:00:00Z,2024-11-27T07:45:00Z",
                "Start,2025-01-01T13:40:53Z,2025-01-01T13:40:53Z,",
                "Stop,2025-01-01T13:40:53Z,2025-01-01T13:40:53Z,2025-01-01T14:45:00Z",
            ],
        );
        assert_eq!(
            times(&events),
            vec![
                (EventKind::Stop, ts("2024-11-27T07:00:00Z").unwrap()),
                (EventKind::Start, ts("2025-01-01T13:40:53Z").unwrap()),
                (EventKind::Stop, ts("2025-01-01T14:45:00Z").unwrap()),
            ]
        );
    }

    #[test]
    fn type2_repeated_starts_collapse() {
        let events = apply(
            "southern",
            &[
                "Start,2025-01-01T16:50:08Z,2025-01-01T16:50:08Z,",
                "Start,2025-01-02T00:01:05Z,2025-01-02T00:01:05Z,",
                "Stop,2025-01-02T00:01:05Z,2025-01-02T00:01:05Z,2025-01-02T00:20:49Z",
            ],
        );
        assert_eq!(
            times(&events),
            vec![
                (EventKind::Start, ts("2025-01-01T16:50:08Z").unwrap()),
                (EventKind::Stop, ts("2025-01-02T00:20:49Z").unwrap()),
            ]
        );
    }

    #[test]
    fn type2_stop_falls_back_to_latest_event_start() {
        let events = apply(
            "southern",
            &[
                "Start,2025-01-01T16:50:08Z,,",
                "Stop,,2025-01-01T18:00:00Z,",
            ],
        );
        assert_eq!(events[1].event_time, ts("2025-01-01T18:00:00Z").unwrap());
    }

    #[test]
    fn type2_stop_falls_back_to_last_updated() {
        let events = apply("southern", &["Start,2025-01-01T16:50:08Z,,", "Stop,,,"]);
        assert_eq!(events[1].event_time, ts("2025-01-04T11:59:00Z").unwrap());
    }

    #[test]
    fn change_at_same_instant_is_nudged() {
        let events = apply(
            "anglian",
            &[
                "Start,2025-01-01T13:40:53Z,,",
                "Stop,2025-01-01T13:40:53Z,,",
            ],
        );
        assert_eq!(events[1].event_time, ts("2025-01-01T13:40:54Z").unwrap());
    }

    #[test]
    fn initial_start_without_times_is_unresolved() {
        let registry = registry();
        let mut p = poll("anglian", "Start,,,");
        p.last_updated = None;

        let err = registry.interpret(None, &p).unwrap_err();
        assert!(matches!(
            err,
            TimelineError::UnresolvedTimestamp {
                status: PollStatus::Start,
                ..
            }
        ));
    }

    #[test]
    fn initial_start_ignores_last_updated() {
        let registry = registry();
        let p = poll("anglian", "Start,,,");
        assert!(p.last_updated.is_some());

        for source in ["anglian", "southern"] {
            let mut p = p.clone();
            p.source_id = SourceId::new(source).unwrap();
            let err = registry.interpret(None, &p).unwrap_err();
            assert!(matches!(err, TimelineError::UnresolvedTimestamp { .. }));
        }
    }

    #[test]
    fn initial_offline_falls_back_to_last_updated() {
        let events = apply("anglian", &["Offline,,,"]);
        assert_eq!(
            times(&events),
            vec![(EventKind::Offline, ts("2025-01-04T11:59:00Z").unwrap())]
        );
    }

    #[test]
    fn start_after_history_falls_back_to_batch_time() {
        let registry = registry();
        let prev = apply("anglian", &["Stop,2025-01-01T00:00:00Z,,"]).remove(0);
        let mut p = poll("anglian", "Start,,,");
        p.last_updated = None;

        let event = registry.interpret(Some(&prev), &p).unwrap().unwrap();
        assert_eq!(event.event_time, batch_time());
    }

    #[test]
    fn interpretation_is_idempotent() {
        let registry = registry();
        let prev = apply("anglian", &["Stop,2025-01-01T00:00:00Z,,"]).remove(0);
        let p = poll("anglian", "Start,2025-01-02T00:00:00Z,,");

        let first = registry.interpret(Some(&prev), &p).unwrap();
        let second = registry.interpret(Some(&prev), &p).unwrap();
        assert_eq!(first, second);
        assert!(first.is_some());

        let repeat = poll("anglian", "Stop,2025-01-02T00:00:00Z,,");
        assert_eq!(registry.interpret(Some(&prev), &repeat).unwrap(), None);
        assert_eq!(registry.interpret(Some(&prev), &repeat).unwrap(), None);
    }

    #[test]
    fn unknown_source_errors() {
        let err = registry()
            .interpret(None, &poll("wessex", "Stop,,,"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "no interpretation strategy registered for source wessex"
        );
    }

    #[test]
    fn validity_cutoff_filters_old_polls() {
        let cutoff = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
        let registry = SourceRegistry::new().with_source(
            SourceId::new("anglian").unwrap(),
            SourceProfile::new(Strategy::Type1).valid_from(cutoff),
        );
        let mut p = poll("anglian", "Stop,,,");
        assert!(!registry.accepts(&p));

        p.poll_time = cutoff;
        assert!(registry.accepts(&p));
    }

    #[test]
    fn strategy_parses_config_names() {
        assert_eq!("type-1".parse::<Strategy>().unwrap(), Strategy::Type1);
        assert_eq!("type-2".parse::<Strategy>().unwrap(), Strategy::Type2);
        assert!("type-3".parse::<Strategy>().is_err());
        let parsed: Strategy = serde_json::from_str("\"type-2\"").unwrap();
        assert_eq!(parsed, Strategy::Type2);
    }
}
