//! Parallel aggregation of consensuses into mutations tables
//!
//! A producer thread feeds consensuses into a bounded channel; a rayon pool
//! drains it, tests minor candidates and appends every consensus to the
//! table of its reference. Minor statistics are gathered in per-worker
//! shards and combined at the end.

use crate::alignment::{Consensus, MutationExtractor};
use crate::config::{MinorCallerConfig, PipelineConfig};
use crate::minor::MinorCaller;
use crate::table::TableLibrary;
use crate::utils::log_progress;
use crate::{UmivarError, UmivarResult};
use crossbeam_channel::bounded;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

const PROGRESS_INTERVAL: u64 = 100_000;

/// Counters of one pipeline run
#[derive(Debug, Default)]
pub struct PipelineStats {
    consensuses: AtomicU64,
    reads: AtomicU64,
    skipped: AtomicU64,
    majors: AtomicU64,
    minors_tested: AtomicU64,
    minors_called: AtomicU64,
}

impl PipelineStats {
    pub fn consensuses(&self) -> u64 {
        self.consensuses.load(Ordering::Relaxed)
    }

    /// Reads in all consensuses handed to the workers
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Consensuses mapped to a reference missing from the library
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn majors(&self) -> u64 {
        self.majors.load(Ordering::Relaxed)
    }

    pub fn minors_tested(&self) -> u64 {
        self.minors_tested.load(Ordering::Relaxed)
    }

    pub fn minors_called(&self) -> u64 {
        self.minors_called.load(Ordering::Relaxed)
    }
}

/// Result of a pipeline run: the combined minor caller and run counters
#[derive(Debug)]
pub struct PipelineOutput {
    pub minor_caller: MinorCaller,
    pub stats: PipelineStats,
}

pub struct Pipeline {
    config: PipelineConfig,
    minor_config: MinorCallerConfig,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, minor_config: &MinorCallerConfig) -> UmivarResult<Self> {
        config.validate()?;
        minor_config.validate()?;
        Ok(Self {
            config: config.clone(),
            minor_config: minor_config.clone(),
        })
    }

    /// Process a stream of consensuses into `tables`.
    ///
    /// Stops early once `max_reads` reads have been handed out; consensuses
    /// already in flight are always processed completely.
    pub fn run<I>(&self, consensuses: I, tables: &TableLibrary) -> UmivarResult<PipelineOutput>
    where
        I: IntoIterator<Item = Consensus>,
        I::IntoIter: Send,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()
            .map_err(|e| UmivarError::ThreadPool(e.to_string()))?;

        let stats = PipelineStats::default();
        let (sender, receiver) = bounded::<Consensus>(self.config.buffer_size);
        let max_reads = self.config.max_reads;
        let consensuses = consensuses.into_iter();

        log::info!(
            "Processing consensuses with {} threads, buffer of {}",
            self.config.threads,
            self.config.buffer_size
        );

        let minor_caller = thread::scope(|s| {
            let stats = &stats;
            let producer = s.spawn(move || {
                let mut sent = 0u64;
                let mut reads = 0u64;
                for consensus in consensuses {
                    if max_reads.is_some_and(|limit| reads >= limit) {
                        log::info!("Read limit reached after {} consensuses", sent);
                        break;
                    }
                    reads += consensus.read_count as u64;
                    if sender.send(consensus).is_err() {
                        break;
                    }
                    sent += 1;
                    if sent % PROGRESS_INTERVAL == 0 {
                        log_progress(sent, None, "Consensuses queued");
                    }
                }
                stats.reads.store(reads, Ordering::Relaxed);
            });

            let minor_caller = pool.install(|| {
                receiver
                    .into_iter()
                    .par_bridge()
                    .fold(
                        || MinorCaller::new(&self.minor_config),
                        |shard, consensus| {
                            self.process(&consensus, tables, &shard, stats);
                            shard
                        },
                    )
                    .reduce(
                        || MinorCaller::new(&self.minor_config),
                        |a, b| a.combine(&b),
                    )
            });

            match producer.join() {
                Ok(()) => Ok(minor_caller),
                Err(_) => Err(UmivarError::ThreadPool(
                    "Consensus producer thread panicked".to_string(),
                )),
            }
        })?;

        log::info!(
            "Processed {} consensuses ({} reads), {} major mutations, {} of {} minors called",
            stats.consensuses(),
            stats.reads(),
            stats.majors(),
            stats.minors_called(),
            stats.minors_tested()
        );
        if stats.skipped() > 0 {
            log::warn!("Skipped {} consensuses with unknown references", stats.skipped());
        }

        Ok(PipelineOutput {
            minor_caller,
            stats,
        })
    }

    fn process(
        &self,
        consensus: &Consensus,
        tables: &TableLibrary,
        minor_caller: &MinorCaller,
        stats: &PipelineStats,
    ) {
        let Some(table) = tables.table(consensus.reference) else {
            log::warn!("Consensus mapped to unknown reference {}", consensus.reference);
            stats.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let extractor = MutationExtractor::new(
            table.reference(),
            &consensus.alignment,
            &consensus.quality,
            self.config.consensus_quality_threshold,
        );
        let majors = extractor.major_mutations();

        let mut minors = Vec::with_capacity(consensus.minors.len());
        for candidate in &consensus.minors {
            if !candidate.code.is_substitution() {
                continue;
            }
            stats.minors_tested.fetch_add(1, Ordering::Relaxed);

            let called = minor_caller.call_and_update(
                candidate.code.from_base(),
                candidate.code.to_base(),
                candidate.supporting_reads,
                candidate.total_reads,
            );
            if !called {
                continue;
            }
            stats.minors_called.fetch_add(1, Ordering::Relaxed);

            if let Some(code) = extractor.minor_to_reference(candidate.code) {
                minors.push(code);
            }
        }

        table.append(&consensus.alignment, &consensus.quality, &majors, &minors);

        stats.consensuses.fetch_add(1, Ordering::Relaxed);
        stats.majors.fetch_add(majors.len() as u64, Ordering::Relaxed);
    }
}
