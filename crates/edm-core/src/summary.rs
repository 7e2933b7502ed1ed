//! Reduces one day's totals to a single category label.

use std::fmt;

use chrono::TimeDelta;
use serde::{Serialize, Serializer};

use crate::calendar::DayBucket;
use crate::machine::MonitorState;

/// Day categories, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Overflowing,
    PotentiallyOverflowing,
    Offline,
    Unknown,
    Online,
}

impl Category {
    const PRIORITY: [Self; 5] = [
        Self::Overflowing,
        Self::PotentiallyOverflowing,
        Self::Offline,
        Self::Unknown,
        Self::Online,
    ];

    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Overflowing => "o",
            Self::PotentiallyOverflowing => "p",
            Self::Offline => "z",
            Self::Unknown => "u",
            Self::Online => "a",
        }
    }

    /// The monitor state whose time this category counts.
    pub const fn state(self) -> MonitorState {
        match self {
            Self::Overflowing => MonitorState::Start,
            Self::PotentiallyOverflowing => MonitorState::PotentiallyOverflowing,
            Self::Offline => MonitorState::Offline,
            Self::Unknown => MonitorState::Unknown,
            Self::Online => MonitorState::Stop,
        }
    }
}

/// A `<prefix>-<hours>` code such as `o-4` or `u-24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CategoryLabel {
    pub category: Category,
    /// Hours in the category, rounded up to a multiple of four.
    pub hours: i64,
}

impl fmt::Display for CategoryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.category.prefix(), self.hours)
    }
}

impl Serialize for CategoryLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Rounds a duration up to whole hours, then up to the next multiple of four.
pub fn band_hours(duration: TimeDelta) -> i64 {
    let millis = duration.num_milliseconds();
    let hours = ((millis + MILLIS_PER_HOUR - 1) / MILLIS_PER_HOUR).max(1);
    (hours + 3) / 4 * 4
}

/// Labels a day by its highest-priority non-zero category.
///
/// Returns `None` for an empty bucket; callers skip those days.
pub fn summarize(bucket: &DayBucket) -> Option<CategoryLabel> {
    Category::PRIORITY.iter().find_map(|&category| {
        let duration = bucket.get(category.state());
        (duration > TimeDelta::zero()).then(|| CategoryLabel {
            category,
            hours: band_hours(duration),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;

    use MonitorState::{Offline, PotentiallyOverflowing, Start, Stop, Unknown};

    fn hours(n: i64) -> TimeDelta {
        TimeDelta::hours(n)
    }

    fn bucket(parts: &[(MonitorState, TimeDelta)]) -> DayBucket {
        let mut bucket = DayBucket::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        for &(state, delta) in parts {
            bucket.allocate(state, delta).unwrap();
        }
        bucket
    }

    fn label(parts: &[(MonitorState, TimeDelta)]) -> String {
        summarize(&bucket(parts)).unwrap().to_string()
    }

    #[test]
    fn single_state_days() {
        assert_eq!(label(&[(Unknown, hours(24))]), "u-24");
        assert_eq!(label(&[(Start, hours(24))]), "o-24");
        assert_eq!(label(&[(Offline, hours(24))]), "z-24");
        assert_eq!(label(&[(Stop, hours(24))]), "a-24");
        assert_eq!(label(&[(PotentiallyOverflowing, hours(24))]), "p-24");
    }

    #[test]
    fn offline_beats_online() {
        assert_eq!(label(&[(Stop, hours(20)), (Offline, hours(4))]), "z-4");
    }

    #[test]
    fn potentially_overflowing_beats_offline() {
        assert_eq!(
            label(&[(PotentiallyOverflowing, hours(20)), (Offline, hours(4))]),
            "p-20"
        );
    }

    #[test]
    fn unknown_beats_online_and_bands_up() {
        assert_eq!(label(&[(Stop, hours(20)), (Unknown, hours(4))]), "u-4");
        assert_eq!(label(&[(Stop, hours(12)), (Unknown, hours(12))]), "u-12");
        assert_eq!(label(&[(Stop, hours(19)), (Unknown, hours(5))]), "u-8");
    }

    #[test]
    fn overflowing_beats_everything() {
        assert_eq!(label(&[(Stop, hours(20)), (Start, hours(4))]), "o-4");
        assert_eq!(label(&[(Offline, hours(20)), (Start, hours(4))]), "o-4");
        assert_eq!(label(&[(Unknown, hours(20)), (Start, hours(4))]), "o-4");
    }

    #[test]
    fn minutes_of_overflow_band_to_four_hours() {
        assert_eq!(
            label(&[
                (Stop, TimeDelta::seconds(86_160)),
                (Start, TimeDelta::seconds(240)),
            ]),
            "o-4"
        );
    }

    #[test]
    fn empty_bucket_has_no_label() {
        assert_eq!(summarize(&bucket(&[])), None);
    }

    #[test]
    fn banding_edges() {
        assert_eq!(band_hours(TimeDelta::seconds(1)), 4);
        assert_eq!(band_hours(hours(4)), 4);
        assert_eq!(band_hours(hours(4) + TimeDelta::seconds(1)), 8);
        assert_eq!(band_hours(hours(23)), 24);
    }
}
