//! Interfaces to the collaborators that fetch polls and persist events.
//!
//! The engine never talks to a database or a feature service directly. A
//! [`PollSource`] hands out unprocessed batches per source; an [`EventStore`]
//! supplies the last event per asset and appends each batch's events as one
//! unit. [`MemoryStore`] implements both for tests and replays.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::Event;
use crate::poll::RawPoll;
use crate::types::{AssetId, BatchId, SourceId};

/// Collaborator errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or read.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A batch was committed twice.
    #[error("batch {batch_id} from {source_id} already committed")]
    AlreadyCommitted {
        source_id: SourceId,
        batch_id: BatchId,
    },
}

/// All polls one source returned at one poll time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBatch {
    pub source_id: SourceId,
    pub batch_id: BatchId,
    pub poll_time: DateTime<Utc>,
    pub polls: Vec<RawPoll>,
}

/// Supplies poll batches that have not been interpreted yet.
pub trait PollSource: Send + Sync {
    /// Unprocessed batches for `source_id`, oldest first.
    fn unprocessed(&self, source_id: &SourceId) -> Result<Vec<PollBatch>, StoreError>;
}

/// Append-only event persistence.
pub trait EventStore: Send + Sync {
    /// The most recent event of every asset belonging to `source_id`.
    fn latest_events(&self, source_id: &SourceId) -> Result<HashMap<AssetId, Event>, StoreError>;

    /// When each asset of `source_id` last appeared in a committed batch.
    fn last_seen(&self, source_id: &SourceId) -> Result<HashMap<AssetId, DateTime<Utc>>, StoreError>;

    /// Appends a batch's events and marks the batch processed, atomically.
    fn commit(
        &self,
        source_id: &SourceId,
        batch_id: &BatchId,
        events: &[Event],
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    batches: BTreeMap<SourceId, Vec<PollBatch>>,
    processed: HashSet<(SourceId, BatchId)>,
    events: BTreeMap<SourceId, Vec<Event>>,
}

/// In-memory [`PollSource`] and [`EventStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups loose polls into batches by source and batch id.
    ///
    /// A batch's poll time is the latest `poll_time` among its polls.
    pub fn from_polls<I>(polls: I) -> Self
    where
        I: IntoIterator<Item = RawPoll>,
    {
        let mut grouped: BTreeMap<(SourceId, BatchId), Vec<RawPoll>> = BTreeMap::new();
        for poll in polls {
            grouped
                .entry((poll.source_id.clone(), poll.batch_id.clone()))
                .or_default()
                .push(poll);
        }

        let store = Self::new();
        {
            let mut inner = store.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            for ((source_id, batch_id), polls) in grouped {
                let Some(poll_time) = polls.iter().map(|p| p.poll_time).max() else {
                    continue;
                };
                inner
                    .batches
                    .entry(source_id.clone())
                    .or_default()
                    .push(PollBatch {
                        source_id,
                        batch_id,
                        poll_time,
                        polls,
                    });
            }
            for batches in inner.batches.values_mut() {
                batches.sort_by_key(|b| b.poll_time);
            }
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Queues a batch for processing.
    pub fn add_batch(&self, batch: PollBatch) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let batches = inner.batches.entry(batch.source_id.clone()).or_default();
        batches.push(batch);
        batches.sort_by_key(|b| b.poll_time);
        Ok(())
    }

    /// Sources with at least one batch.
    pub fn sources(&self) -> Result<Vec<SourceId>, StoreError> {
        Ok(self.lock()?.batches.keys().cloned().collect())
    }

    /// The newest poll time across all batches of a source.
    pub fn latest_poll_time(&self, source_id: &SourceId) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .lock()?
            .batches
            .get(source_id)
            .and_then(|batches| batches.iter().map(|b| b.poll_time).max()))
    }

    /// Committed events for a source, ordered by asset then time.
    pub fn events(&self, source_id: &SourceId) -> Result<Vec<Event>, StoreError> {
        let mut events = self
            .lock()?
            .events
            .get(source_id)
            .cloned()
            .unwrap_or_default();
        events.sort_by(|a, b| {
            a.asset_id
                .cmp(&b.asset_id)
                .then(a.event_time.cmp(&b.event_time))
        });
        Ok(events)
    }
}

impl PollSource for MemoryStore {
    fn unprocessed(&self, source_id: &SourceId) -> Result<Vec<PollBatch>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .batches
            .get(source_id)
            .map(|batches| {
                batches
                    .iter()
                    .filter(|b| !inner.processed.contains(&(source_id.clone(), b.batch_id.clone())))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl EventStore for MemoryStore {
    fn latest_events(&self, source_id: &SourceId) -> Result<HashMap<AssetId, Event>, StoreError> {
        let inner = self.lock()?;
        let mut latest: HashMap<AssetId, Event> = HashMap::new();
        for event in inner.events.get(source_id).into_iter().flatten() {
            let newer = latest
                .get(&event.asset_id)
                .is_none_or(|known| event.event_time > known.event_time);
            if newer {
                latest.insert(event.asset_id.clone(), event.clone());
            }
        }
        Ok(latest)
    }

    fn last_seen(&self, source_id: &SourceId) -> Result<HashMap<AssetId, DateTime<Utc>>, StoreError> {
        let inner = self.lock()?;
        let mut seen: HashMap<AssetId, DateTime<Utc>> = HashMap::new();
        let committed = inner
            .batches
            .get(source_id)
            .into_iter()
            .flatten()
            .filter(|b| inner.processed.contains(&(source_id.clone(), b.batch_id.clone())));
        for poll in committed.flat_map(|b| b.polls.iter()) {
            seen.entry(poll.asset_id.clone())
                .and_modify(|t| *t = (*t).max(poll.poll_time))
                .or_insert(poll.poll_time);
        }
        Ok(seen)
    }

    fn commit(
        &self,
        source_id: &SourceId,
        batch_id: &BatchId,
        events: &[Event],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner
            .processed
            .insert((source_id.clone(), batch_id.clone()))
        {
            return Err(StoreError::AlreadyCommitted {
                source_id: source_id.clone(),
                batch_id: batch_id.clone(),
            });
        }
        inner
            .events
            .entry(source_id.clone())
            .or_default()
            .extend_from_slice(events);
        Ok(())
    }
}
