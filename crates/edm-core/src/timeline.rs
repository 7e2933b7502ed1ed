//! Turns stored events into per-asset calendars.
//!
//! Each asset gets a [`Monitor`] and a [`Calendar`] on first sight. Accepted
//! transitions are fed to that asset's calendar only; at the end every
//! calendar is flushed to a common cutoff, normally the newest poll batch.
//! An asset whose events break the state machine is dropped and reported;
//! the others carry on.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::calendar::{Calendar, DayBucket, midnight};
use crate::error::TimelineError;
use crate::event::Event;
use crate::machine::{Monitor, MonitorState};
use crate::summary::{CategoryLabel, summarize};
use crate::types::AssetId;

#[derive(Debug, Clone)]
struct AssetTimeline {
    monitor: Monitor,
    calendar: Calendar,
}

/// Accumulates events for many assets.
#[derive(Debug, Clone)]
pub struct TimelineBuilder {
    start: NaiveDate,
    cutoff: DateTime<Utc>,
    assets: BTreeMap<AssetId, AssetTimeline>,
    failed: BTreeMap<AssetId, TimelineError>,
    skipped: usize,
}

impl TimelineBuilder {
    /// Calendars start at midnight of `start` in the `Unknown` state and are
    /// closed at `cutoff`.
    pub const fn new(start: NaiveDate, cutoff: DateTime<Utc>) -> Self {
        Self {
            start,
            cutoff,
            assets: BTreeMap::new(),
            failed: BTreeMap::new(),
            skipped: 0,
        }
    }

    /// Feeds one event. Events for an asset must arrive in time order.
    ///
    /// Events outside `[start, cutoff]` are skipped: some sources publish
    /// timestamps in the future. An event the asset's monitor rejects drops
    /// that asset's timeline; later events for it are ignored.
    pub fn push(&mut self, event: &Event) {
        if self.failed.contains_key(&event.asset_id) {
            return;
        }
        if event.event_time > self.cutoff || event.event_time < midnight(self.start) {
            tracing::info!(
                asset_id = %event.asset_id,
                kind = %event.kind,
                event_time = %event.event_time,
                cutoff = %self.cutoff,
                "skipping event outside the summary window"
            );
            self.skipped += 1;
            return;
        }

        let start = self.start;
        let AssetTimeline { monitor, calendar } = self
            .assets
            .entry(event.asset_id.clone())
            .or_insert_with(|| AssetTimeline {
                monitor: Monitor::new(event.asset_id.clone()),
                calendar: Calendar::new(MonitorState::Unknown, start),
            });

        let applied = monitor.apply(event.kind, event.event_time, |state, at| {
            calendar.add(state, at)
        });
        if let Err(error) = applied {
            self.fail(event.asset_id.clone(), error);
        }
    }

    pub fn extend<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Event>,
    {
        for event in events {
            self.push(event);
        }
    }

    fn fail(&mut self, asset_id: AssetId, error: TimelineError) {
        tracing::warn!(%asset_id, %error, "dropping asset timeline");
        self.assets.remove(&asset_id);
        self.failed.insert(asset_id, error);
    }

    /// Flushes every calendar up to the cutoff.
    pub fn finish(mut self) -> Timelines {
        let cutoff = self.cutoff;
        let mut calendars = BTreeMap::new();
        for (asset_id, timeline) in std::mem::take(&mut self.assets) {
            let mut calendar = timeline.calendar;
            match calendar.close(cutoff) {
                Ok(()) => {
                    calendars.insert(asset_id, calendar);
                }
                Err(error) => self.fail(asset_id, error),
            }
        }

        tracing::debug!(
            assets = calendars.len(),
            failed = self.failed.len(),
            skipped = self.skipped,
            %cutoff,
            "timelines closed"
        );

        Timelines {
            calendars,
            failed: self.failed,
            skipped: self.skipped,
        }
    }
}

/// One asset's totals for one day, with its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySummary<'a> {
    pub asset_id: &'a AssetId,
    pub bucket: &'a DayBucket,
    pub label: CategoryLabel,
}

impl DailySummary<'_> {
    pub const fn date(&self) -> NaiveDate {
        self.bucket.date()
    }
}

/// Closed calendars, keyed by asset.
#[derive(Debug, Clone)]
pub struct Timelines {
    calendars: BTreeMap<AssetId, Calendar>,
    failed: BTreeMap<AssetId, TimelineError>,
    skipped: usize,
}

impl Timelines {
    pub fn calendar(&self, asset_id: &AssetId) -> Option<&Calendar> {
        self.calendars.get(asset_id)
    }

    /// Assets dropped because their events could not be applied.
    pub fn failures(&self) -> impl Iterator<Item = (&AssetId, &TimelineError)> {
        self.failed.iter()
    }

    /// Events dropped for falling outside the window.
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Every non-empty day on or after `since`, ordered by asset then date.
    pub fn days(&self, since: NaiveDate) -> impl Iterator<Item = DailySummary<'_>> + '_ {
        self.calendars.iter().flat_map(move |(asset_id, calendar)| {
            calendar.allocations(since).filter_map(move |bucket| {
                summarize(bucket).map(|label| DailySummary {
                    asset_id,
                    bucket,
                    label,
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeDelta;

    use crate::event::EventKind;
    use crate::types::BatchId;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid test timestamp")
            .with_timezone(&Utc)
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().expect("valid test date")
    }

    fn event(asset: &str, kind: EventKind, time: &str) -> Event {
        Event {
            asset_id: AssetId::new(asset).unwrap(),
            kind,
            event_time: at(time),
            source_batch_id: BatchId::new("b").unwrap(),
            observed_at: at(time),
        }
    }

    #[test]
    fn builds_labelled_days_per_asset() {
        let events = [
            event("a", EventKind::Stop, "2025-01-01T06:00:00Z"),
            event("a", EventKind::Start, "2025-01-02T10:00:00Z"),
            event("a", EventKind::Stop, "2025-01-02T13:30:00Z"),
            event("b", EventKind::Offline, "2025-01-01T00:00:00Z"),
        ];

        let mut builder = TimelineBuilder::new(date("2025-01-01"), at("2025-01-03T00:00:00Z"));
        builder.extend(&events);
        let timelines = builder.finish();

        let rows: Vec<(String, NaiveDate, String)> = timelines
            .days(date("2025-01-01"))
            .map(|d| (d.asset_id.to_string(), d.date(), d.label.to_string()))
            .collect();

        assert_eq!(
            rows,
            vec![
                ("a".to_string(), date("2025-01-01"), "u-8".to_string()),
                ("a".to_string(), date("2025-01-02"), "o-4".to_string()),
                ("b".to_string(), date("2025-01-01"), "z-24".to_string()),
                ("b".to_string(), date("2025-01-02"), "z-24".to_string()),
            ]
        );
    }

    #[test]
    fn offline_while_overflowing_counts_as_potential() {
        let events = [
            event("a", EventKind::Start, "2025-01-01T12:00:00Z"),
            event("a", EventKind::Offline, "2025-01-01T18:00:00Z"),
        ];
        let mut builder = TimelineBuilder::new(date("2025-01-01"), at("2025-01-02T00:00:00Z"));
        builder.extend(&events);
        let timelines = builder.finish();

        let calendar = timelines.calendar(&AssetId::new("a").unwrap()).unwrap();
        let day = calendar.allocations(date("2025-01-01")).next().unwrap();
        assert_eq!(day.get(MonitorState::Unknown), TimeDelta::hours(12));
        assert_eq!(day.get(MonitorState::Start), TimeDelta::hours(6));
        assert_eq!(
            day.get(MonitorState::PotentiallyOverflowing),
            TimeDelta::hours(6)
        );
    }

    #[test]
    fn future_events_are_skipped() {
        let events = [
            event("a", EventKind::Stop, "2025-01-01T00:00:00Z"),
            event("a", EventKind::Start, "2031-06-01T00:00:00Z"),
        ];
        let mut builder = TimelineBuilder::new(date("2025-01-01"), at("2025-01-02T00:00:00Z"));
        builder.extend(&events);
        let timelines = builder.finish();

        assert_eq!(timelines.skipped(), 1);
        let labels: Vec<String> = timelines
            .days(NaiveDate::MIN)
            .map(|d| d.label.to_string())
            .collect();
        assert_eq!(labels, vec!["a-24".to_string()]);
    }

    #[test]
    fn repeated_offline_drops_only_that_asset() {
        let events = [
            event("a", EventKind::Offline, "2025-01-01T01:00:00Z"),
            event("a", EventKind::Offline, "2025-01-01T02:00:00Z"),
            event("a", EventKind::Stop, "2025-01-01T03:00:00Z"),
            event("b", EventKind::Stop, "2025-01-01T00:00:00Z"),
        ];
        let mut builder = TimelineBuilder::new(date("2025-01-01"), at("2025-01-03T00:00:00Z"));
        builder.extend(&events);
        let timelines = builder.finish();

        let failures: Vec<(&AssetId, &TimelineError)> = timelines.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.as_str(), "a");
        assert!(matches!(failures[0].1, TimelineError::IllegalTransition { .. }));
        assert!(timelines.calendar(&AssetId::new("a").unwrap()).is_none());

        let rows: Vec<(String, String)> = timelines
            .days(date("2025-01-01"))
            .map(|d| (d.asset_id.to_string(), d.label.to_string()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("b".to_string(), "a-24".to_string()),
                ("b".to_string(), "a-24".to_string()),
            ]
        );
    }

    #[test]
    fn out_of_order_events_fail_the_asset() {
        let events = [
            event("a", EventKind::Stop, "2025-01-01T05:00:00Z"),
            event("a", EventKind::Start, "2025-01-01T04:00:00Z"),
        ];
        let mut builder = TimelineBuilder::new(date("2025-01-01"), at("2025-01-02T00:00:00Z"));
        builder.extend(&events);
        let timelines = builder.finish();

        let (asset_id, error) = timelines.failures().next().unwrap();
        assert_eq!(asset_id.as_str(), "a");
        assert!(matches!(error, TimelineError::SequenceViolation { .. }));
        assert_eq!(timelines.days(NaiveDate::MIN).count(), 0);
    }
}
