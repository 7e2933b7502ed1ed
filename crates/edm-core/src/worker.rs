//! Per-source batch processing and the bounded worker pool.
//!
//! Sources are independent: each one is handled by a single task that walks
//! its unprocessed batches oldest first, so every asset sees its polls in
//! order. Tasks for different sources run concurrently on a rayon pool with a
//! fixed thread count.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use rayon::prelude::*;
use thiserror::Error;

use crate::error::TimelineError;
use crate::event::Event;
use crate::machine::{MonitorState, transition};
use crate::poll::RawPoll;
use crate::sequence::realign;
use crate::source::SourceRegistry;
use crate::stale::synthesize_stops;
use crate::store::{EventStore, PollBatch, PollSource, StoreError};
use crate::types::{AssetId, SourceId};

/// Default number of sources processed at once.
pub const DEFAULT_WORKERS: usize = 5;

/// A fatal error for one asset, with the context needed to diagnose it.
///
/// The asset's poll is dropped for the batch; other assets are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFailure {
    pub asset_id: AssetId,
    pub previous: Option<Event>,
    pub poll: RawPoll,
    pub error: TimelineError,
}

/// The result of interpreting one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// New events, in poll order.
    pub events: Vec<Event>,
    /// Polls whose timestamps were moved forward.
    pub corrected: usize,
    /// Repeat polls for an asset already seen in the batch.
    pub duplicates: usize,
    /// Polls excluded by the asset filter or the source's validity window.
    pub filtered: usize,
    pub failures: Vec<AssetFailure>,
}

/// Interprets the batches of one source, carrying each asset's last event
/// from batch to batch.
#[derive(Debug)]
pub struct SourceWorker<'a> {
    source_id: SourceId,
    registry: &'a SourceRegistry,
    asset_filter: Option<&'a AssetId>,
    latest: HashMap<AssetId, Event>,
    last_seen: HashMap<AssetId, DateTime<Utc>>,
    latest_poll_time: Option<DateTime<Utc>>,
}

impl<'a> SourceWorker<'a> {
    /// `latest` holds the most recent stored event per asset.
    pub fn new(
        source_id: SourceId,
        registry: &'a SourceRegistry,
        latest: HashMap<AssetId, Event>,
    ) -> Self {
        Self {
            source_id,
            registry,
            asset_filter: None,
            latest,
            last_seen: HashMap::new(),
            latest_poll_time: None,
        }
    }

    /// Restricts processing to a single asset.
    #[must_use]
    pub const fn with_asset_filter(mut self, asset_id: Option<&'a AssetId>) -> Self {
        self.asset_filter = asset_id;
        self
    }

    /// Seeds when each asset was last polled in earlier runs.
    #[must_use]
    pub fn with_last_seen(mut self, last_seen: HashMap<AssetId, DateTime<Utc>>) -> Self {
        self.last_seen = last_seen;
        self
    }

    pub const fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    /// The last event per asset, including events emitted by this worker.
    pub const fn latest(&self) -> &HashMap<AssetId, Event> {
        &self.latest
    }

    pub fn process_batch(&mut self, batch: &PollBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut seen: HashMap<&AssetId, usize> = HashMap::new();

        self.latest_poll_time = self.latest_poll_time.max(Some(batch.poll_time));

        for poll in &batch.polls {
            if self.asset_filter.is_some_and(|only| *only != poll.asset_id) {
                outcome.filtered += 1;
                continue;
            }

            let count = seen.entry(&poll.asset_id).or_insert(0);
            *count += 1;
            if *count > 1 {
                outcome.duplicates += 1;
                continue;
            }
            self.last_seen.insert(poll.asset_id.clone(), poll.poll_time);

            if !self.registry.accepts(poll) {
                outcome.filtered += 1;
                continue;
            }

            let previous = self.latest.get(&poll.asset_id).cloned();
            let realigned = previous.as_ref().and_then(|prev| realign(prev, poll));
            if realigned.is_some() {
                outcome.corrected += 1;
            }
            let poll = realigned.as_ref().unwrap_or(poll);

            match self.step(previous.as_ref(), poll) {
                Ok(Some(event)) => {
                    self.latest.insert(event.asset_id.clone(), event.clone());
                    outcome.events.push(event);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        source_id = %self.source_id,
                        batch_id = %batch.batch_id,
                        asset_id = %poll.asset_id,
                        %error,
                        "dropping poll for asset"
                    );
                    outcome.failures.push(AssetFailure {
                        asset_id: poll.asset_id.clone(),
                        previous,
                        poll: poll.clone(),
                        error,
                    });
                }
            }
        }

        if outcome.duplicates > 0 {
            let mut repeated: Vec<(&AssetId, usize)> =
                seen.into_iter().filter(|&(_, n)| n > 1).collect();
            repeated.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            repeated.truncate(5);
            tracing::debug!(
                source_id = %self.source_id,
                batch_id = %batch.batch_id,
                duplicates = outcome.duplicates,
                most_repeated = ?repeated,
                "ignored repeated polls in batch"
            );
        }

        outcome
    }

    fn step(&self, previous: Option<&Event>, poll: &RawPoll) -> Result<Option<Event>, TimelineError> {
        let Some(event) = self.registry.interpret(previous, poll)? else {
            return Ok(None);
        };
        transition(
            &event.asset_id,
            MonitorState::after(previous.map(|p| p.kind)),
            event.kind,
            event.event_time,
        )?;
        Ok(Some(event))
    }

    /// A batch of synthetic stops for assets unseen for `silence_gap`.
    pub fn silent_assets(&self, silence_gap: TimeDelta) -> Option<PollBatch> {
        let latest_poll_time = self.latest_poll_time?;
        match self.asset_filter {
            Some(only) => {
                let seen = HashMap::from([(only.clone(), *self.last_seen.get(only)?)]);
                synthesize_stops(&self.source_id, &seen, latest_poll_time, silence_gap)
            }
            None => synthesize_stops(&self.source_id, &self.last_seen, latest_poll_time, silence_gap),
        }
    }
}

/// Counts for one source across a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source_id: SourceId,
    pub batches: usize,
    pub polls: usize,
    pub events: usize,
    pub corrected: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub failures: Vec<AssetFailure>,
}

impl SourceReport {
    const fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            batches: 0,
            polls: 0,
            events: 0,
            corrected: 0,
            duplicates: 0,
            filtered: 0,
            failures: Vec::new(),
        }
    }

    fn absorb(&mut self, batch: &PollBatch, outcome: BatchOutcome) {
        self.batches += 1;
        self.polls += batch.polls.len();
        self.events += outcome.events.len();
        self.corrected += outcome.corrected;
        self.duplicates += outcome.duplicates;
        self.filtered += outcome.filtered;
        self.failures.extend(outcome.failures);
    }
}

/// Everything one [`WorkerPool::run`] did.
#[derive(Debug, Default)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
    /// Sources abandoned because a collaborator failed.
    pub store_errors: Vec<(SourceId, StoreError)>,
}

impl RunReport {
    pub fn events(&self) -> usize {
        self.sources.iter().map(|s| s.events).sum()
    }

    pub fn corrected(&self) -> usize {
        self.sources.iter().map(|s| s.corrected).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssetFailure> {
        self.sources.iter().flat_map(|s| s.failures.iter())
    }

    pub fn is_clean(&self) -> bool {
        self.store_errors.is_empty() && self.failures().next().is_none()
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

/// Pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub asset_filter: Option<AssetId>,
    /// Stop assets that have gone unreported this long.
    pub silence_gap: Option<TimeDelta>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            asset_filter: None,
            silence_gap: None,
        }
    }
}

/// Runs one task per source on a bounded thread pool.
pub struct WorkerPool<'a, P, E> {
    registry: &'a SourceRegistry,
    polls: &'a P,
    events: &'a E,
    config: PoolConfig,
}

impl<'a, P, E> WorkerPool<'a, P, E>
where
    P: PollSource,
    E: EventStore,
{
    pub const fn new(
        registry: &'a SourceRegistry,
        polls: &'a P,
        events: &'a E,
        config: PoolConfig,
    ) -> Self {
        Self {
            registry,
            polls,
            events,
            config,
        }
    }

    /// Processes every unprocessed batch of each source.
    ///
    /// A collaborator failure abandons that source only; batches committed
    /// before the failure stay committed.
    pub fn run(&self, sources: &[SourceId]) -> Result<RunReport, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .thread_name(|i| format!("edm-worker-{i}"))
            .build()?;

        tracing::info!(
            sources = sources.len(),
            workers = self.config.workers,
            "processing sources"
        );

        let results: Vec<(SourceId, Result<SourceReport, StoreError>)> = pool.install(|| {
            sources
                .par_iter()
                .map(|source_id| (source_id.clone(), self.run_source(source_id)))
                .collect()
        });

        let mut report = RunReport::default();
        for (source_id, result) in results {
            match result {
                Ok(source) => report.sources.push(source),
                Err(error) => {
                    tracing::warn!(%source_id, %error, "source abandoned");
                    report.store_errors.push((source_id, error));
                }
            }
        }
        Ok(report)
    }

    fn run_source(&self, source_id: &SourceId) -> Result<SourceReport, StoreError> {
        let latest = self.events.latest_events(source_id)?;
        let last_seen = self.events.last_seen(source_id)?;
        let mut batches = self.polls.unprocessed(source_id)?;
        batches.sort_by_key(|b| b.poll_time);

        let mut worker = SourceWorker::new(source_id.clone(), self.registry, latest)
            .with_asset_filter(self.config.asset_filter.as_ref())
            .with_last_seen(last_seen);
        let mut report = SourceReport::new(source_id.clone());

        for batch in &batches {
            self.commit(&mut worker, batch, &mut report)?;
        }

        let silent = self
            .config
            .silence_gap
            .and_then(|gap| worker.silent_assets(gap));
        if let Some(batch) = silent {
            self.commit(&mut worker, &batch, &mut report)?;
        }

        tracing::debug!(
            %source_id,
            batches = report.batches,
            events = report.events,
            corrected = report.corrected,
            duplicates = report.duplicates,
            failures = report.failures.len(),
            "source done"
        );
        Ok(report)
    }

    fn commit(
        &self,
        worker: &mut SourceWorker<'_>,
        batch: &PollBatch,
        report: &mut SourceReport,
    ) -> Result<(), StoreError> {
        let outcome = worker.process_batch(batch);
        self.events
            .commit(worker.source_id(), &batch.batch_id, &outcome.events)?;
        report.absorb(batch, outcome);
        Ok(())
    }
}
