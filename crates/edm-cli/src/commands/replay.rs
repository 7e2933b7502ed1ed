//! Replay command: recorded polls in, daily labels out.
//!
//! Polls are read from a JSON-lines file, grouped into batches by source and
//! batch id, and run through the worker pool against an in-memory store. The
//! resulting events are folded into calendars closed at the newest poll time.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use clap::Args;
use serde::Serialize;

use edm_core::{
    AssetId, CategoryLabel, DailySummary, Event, MemoryStore, RawPoll, RunReport, SourceId,
    TimelineBuilder, TimelineError, WorkerPool,
};

use crate::Config;

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// JSON-lines file of recorded polls.
    pub polls: PathBuf,

    /// Only process this asset.
    #[arg(long)]
    pub asset: Option<String>,

    /// First day to report. Defaults to `include_days` before the newest poll.
    #[arg(long, conflicts_with = "restart")]
    pub since: Option<NaiveDate>,

    /// Report every day since `summary_start`.
    #[arg(long)]
    pub restart: bool,

    /// Output as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Also write every derived event to this file as JSON lines.
    #[arg(long)]
    pub events_out: Option<PathBuf>,
}

/// One labelled day, as written by `--json`.
#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    source_id: &'a SourceId,
    asset_id: &'a AssetId,
    date: NaiveDate,
    label: CategoryLabel,
    /// Seconds per monitor state.
    seconds: BTreeMap<&'static str, i64>,
}

impl<'a> SummaryRow<'a> {
    fn new(source_id: &'a SourceId, day: &DailySummary<'a>) -> Self {
        Self {
            source_id,
            asset_id: day.asset_id,
            date: day.date(),
            label: day.label,
            seconds: day
                .bucket
                .totals()
                .map(|(state, duration)| (state.as_str(), duration.num_seconds()))
                .collect(),
        }
    }
}

/// Everything a replay did, including assets dropped while building timelines.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub run: RunReport,
    pub timeline_failures: Vec<(SourceId, AssetId, TimelineError)>,
}

impl ReplayReport {
    pub fn failures(&self) -> usize {
        self.run.failures().count() + self.timeline_failures.len() + self.run.store_errors.len()
    }

    pub fn is_clean(&self) -> bool {
        self.run.is_clean() && self.timeline_failures.is_empty()
    }
}

/// Writes the run totals and one line per failure.
pub fn write_summary<W: Write>(out: &mut W, report: &ReplayReport) -> Result<()> {
    writeln!(
        out,
        "replay: {} events, {} corrected, {} failures",
        report.run.events(),
        report.run.corrected(),
        report.failures()
    )?;
    for failure in report.run.failures() {
        writeln!(
            out,
            "failed: asset {} source {} batch {}: {}",
            failure.asset_id, failure.poll.source_id, failure.poll.batch_id, failure.error
        )?;
    }
    for (source_id, asset_id, error) in &report.timeline_failures {
        writeln!(out, "failed: asset {asset_id} source {source_id} timeline: {error}")?;
    }
    for (source_id, error) in &report.run.store_errors {
        writeln!(out, "abandoned: source {source_id}: {error}")?;
    }
    Ok(())
}

pub fn run<W: Write>(writer: &mut W, args: &ReplayArgs, config: &Config) -> Result<ReplayReport> {
    let polls = read_polls(&args.polls)?;
    let asset_filter = args
        .asset
        .as_deref()
        .map(AssetId::new)
        .transpose()
        .context("invalid --asset")?;

    let store = MemoryStore::from_polls(polls);
    let sources = store.sources()?;
    let registry = config.registry();
    let pool = WorkerPool::new(&registry, &store, &store, config.pool_config(asset_filter));
    let mut report = ReplayReport {
        run: pool.run(&sources)?,
        timeline_failures: Vec::new(),
    };
    let run = &report.run;

    tracing::info!(
        sources = sources.len(),
        events = run.events(),
        corrected = run.corrected(),
        failures = run.failures().count(),
        "replay processed"
    );
    for failure in run.failures() {
        tracing::warn!(
            asset_id = %failure.asset_id,
            source_id = %failure.poll.source_id,
            batch_id = %failure.poll.batch_id,
            previous = ?failure.previous.as_ref().map(|e| (e.kind, e.event_time)),
            error = %failure.error,
            "asset failed"
        );
    }

    let Some(cutoff) = newest_poll(&store, &sources)? else {
        tracing::info!("no polls to replay");
        return Ok(report);
    };
    let since = report_start(args, config, cutoff);

    let mut events_out = args
        .events_out
        .as_deref()
        .map(|path| {
            File::create(path)
                .map(BufWriter::new)
                .with_context(|| format!("failed to create {}", path.display()))
        })
        .transpose()?;

    if !args.json {
        writeln!(writer, "{:<10}  {:<10}  {:<10}  LABEL", "SOURCE", "ASSET", "DATE")?;
    }

    for source_id in &sources {
        let events = store.events(source_id)?;
        if let Some(out) = events_out.as_mut() {
            write_events(out, &events)?;
        }

        let mut builder = TimelineBuilder::new(config.summary_start, cutoff);
        builder.extend(&events);
        let timelines = builder.finish();
        report.timeline_failures.extend(
            timelines
                .failures()
                .map(|(asset_id, error)| (source_id.clone(), asset_id.clone(), error.clone())),
        );

        for day in timelines.days(since) {
            if args.json {
                serde_json::to_writer(&mut *writer, &SummaryRow::new(source_id, &day))?;
                writeln!(writer)?;
            } else {
                writeln!(
                    writer,
                    "{:<10}  {:<10}  {}  {}",
                    source_id.as_str(),
                    day.asset_id.as_str(),
                    day.date(),
                    day.label
                )?;
            }
        }
    }

    if let Some(mut out) = events_out {
        out.flush()?;
    }
    Ok(report)
}

fn read_polls(path: &Path) -> Result<Vec<RawPoll>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut polls = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let poll: RawPoll = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid poll", path.display(), index + 1))?;
        polls.push(poll);
    }
    tracing::debug!(polls = polls.len(), path = %path.display(), "read polls");
    Ok(polls)
}

fn newest_poll(store: &MemoryStore, sources: &[SourceId]) -> Result<Option<DateTime<Utc>>> {
    let mut newest = None;
    for source_id in sources {
        newest = newest.max(store.latest_poll_time(source_id)?);
    }
    Ok(newest)
}

/// The first day to print.
fn report_start(args: &ReplayArgs, config: &Config, cutoff: DateTime<Utc>) -> NaiveDate {
    if args.restart {
        return config.summary_start;
    }
    args.since.unwrap_or_else(|| {
        cutoff
            .date_naive()
            .checked_sub_days(Days::new(u64::from(config.include_days)))
            .unwrap_or(config.summary_start)
            .max(config.summary_start)
    })
}

fn write_events<W: Write>(out: &mut W, events: &[Event]) -> Result<()> {
    for event in events {
        serde_json::to_writer(&mut *out, event)?;
        writeln!(out)?;
    }
    Ok(())
}
