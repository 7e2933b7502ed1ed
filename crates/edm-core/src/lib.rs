//! Core engine for overflow monitor timelines.
//!
//! This crate turns periodic status polls from many water-company feeds into:
//! - Events: strictly ordered Start/Stop/Offline transitions per asset
//! - Calendars: time spent in each monitor state, split by UTC day
//! - Daily labels: one `<category>-<hours>` code per asset per day
//!
//! Fetching polls and storing events are left to implementations of
//! [`PollSource`] and [`EventStore`].

mod calendar;
mod error;
mod event;
mod machine;
mod poll;
mod sequence;
mod source;
mod stale;
mod store;
mod summary;
mod timeline;
mod types;
mod worker;

pub use calendar::{Calendar, DayBucket, midnight};
pub use error::TimelineError;
pub use event::{Event, EventKind};
pub use machine::{Monitor, MonitorState, transition};
pub use poll::{PollStatus, RawPoll};
pub use sequence::{realign, safe_time};
pub use source::{SourceProfile, SourceRegistry, Strategy};
pub use stale::{DEFAULT_SILENCE_GAP, synthesize_stops};
pub use store::{EventStore, MemoryStore, PollBatch, PollSource, StoreError};
pub use summary::{Category, CategoryLabel, band_hours, summarize};
pub use timeline::{DailySummary, TimelineBuilder, Timelines};
pub use types::{AssetId, BatchId, SourceId, ValidationError};
pub use worker::{
    AssetFailure, BatchOutcome, DEFAULT_WORKERS, PoolConfig, PoolError, RunReport, SourceReport,
    SourceWorker, WorkerPool,
};
