//! Day-by-day duration accounting.
//!
//! A [`Calendar`] keeps a cursor (the time of the last transition and the
//! state entered then). Each [`Calendar::add`] allocates the elapsed time since
//! the cursor to the previous state, split at UTC midnight boundaries.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};

use crate::error::TimelineError;
use crate::machine::MonitorState;

const SLOTS: [MonitorState; 5] = [
    MonitorState::Unknown,
    MonitorState::Start,
    MonitorState::Stop,
    MonitorState::Offline,
    MonitorState::PotentiallyOverflowing,
];

const fn slot(state: MonitorState) -> usize {
    match state {
        MonitorState::Unknown => 0,
        MonitorState::Start => 1,
        MonitorState::Stop => 2,
        MonitorState::Offline => 3,
        MonitorState::PotentiallyOverflowing => 4,
    }
}

/// UTC midnight at the start of `day`.
pub fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Time spent in each state during one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBucket {
    date: NaiveDate,
    durations: [TimeDelta; 5],
    total: TimeDelta,
}

impl DayBucket {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            durations: [TimeDelta::zero(); 5],
            total: TimeDelta::zero(),
        }
    }

    /// Adds `delta` to `state`.
    ///
    /// Fails once the bucket would hold more than one day.
    pub fn allocate(
        &mut self,
        state: MonitorState,
        delta: TimeDelta,
    ) -> Result<&mut Self, TimelineError> {
        let total = self.total + delta;
        if total > TimeDelta::days(1) {
            return Err(TimelineError::OverAllocation {
                date: self.date,
                total,
            });
        }
        self.durations[slot(state)] = self.durations[slot(state)] + delta;
        self.total = total;
        Ok(self)
    }

    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    /// Time spent in `state`.
    pub const fn get(&self, state: MonitorState) -> TimeDelta {
        self.durations[slot(state)]
    }

    pub const fn total(&self) -> TimeDelta {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total.is_zero()
    }

    /// Non-zero durations.
    pub fn totals(&self) -> impl Iterator<Item = (MonitorState, TimeDelta)> + '_ {
        SLOTS
            .iter()
            .map(|&state| (state, self.get(state)))
            .filter(|(_, d)| !d.is_zero())
    }
}

/// Per-asset mapping from date to [`DayBucket`], plus the allocation cursor.
#[derive(Debug, Clone)]
pub struct Calendar {
    buckets: BTreeMap<NaiveDate, DayBucket>,
    current: MonitorState,
    last: DateTime<Utc>,
}

impl Calendar {
    /// Starts accounting at midnight of `start` in the `initial` state.
    pub fn new(initial: MonitorState, start: NaiveDate) -> Self {
        Self {
            buckets: BTreeMap::new(),
            current: initial,
            last: midnight(start),
        }
    }

    pub const fn current(&self) -> MonitorState {
        self.current
    }

    pub const fn cursor(&self) -> DateTime<Utc> {
        self.last
    }

    /// Records entering `state` at `at`.
    pub fn add(&mut self, state: MonitorState, at: DateTime<Utc>) -> Result<(), TimelineError> {
        self.advance(at)?;
        self.current = state;
        Ok(())
    }

    /// Flushes the open interval up to `at` without entering a new state.
    pub fn close(&mut self, at: DateTime<Utc>) -> Result<(), TimelineError> {
        self.advance(at)
    }

    fn advance(&mut self, at: DateTime<Utc>) -> Result<(), TimelineError> {
        if at < self.last {
            return Err(TimelineError::SequenceViolation {
                last: self.last,
                at,
            });
        }

        let mut day = self.last.date_naive();
        while day <= at.date_naive() {
            let day_start = midnight(day);
            let day_end = day_start + TimeDelta::days(1);
            let delta = at.min(day_end) - self.last.max(day_start);

            if delta > TimeDelta::zero() {
                self.buckets
                    .entry(day)
                    .or_insert_with(|| DayBucket::new(day))
                    .allocate(self.current, delta)?;
            }

            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        self.last = at;
        Ok(())
    }

    /// Days on or after `since` with any time allocated, in date order.
    pub fn allocations(&self, since: NaiveDate) -> impl Iterator<Item = &DayBucket> + '_ {
        self.buckets
            .range(since..)
            .map(|(_, bucket)| bucket)
            .filter(|bucket| !bucket.is_empty())
    }
}
