//! Significance testing of minor (read-level) mutations per substitution class
//!
//! Every candidate minor mutation inside a MIG is tested against a Poisson
//! background: with `n` reads and a per-base error rate `e` derived from the
//! good-quality threshold, the number of erroneous reads is ~ Poisson(n * e).
//! Counts of tests run and passed, summed p-values and summed read counts
//! are kept per (from, to) class and drive the FDR estimate used by the
//! error model.

use crate::config::MinorCallerConfig;
use crate::nucleotide::{self, ALPHABET_SIZE};
use statrs::function::gamma::{checked_gamma_lr, ln_gamma};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

const CLASSES: usize = ALPHABET_SIZE * ALPHABET_SIZE;

/// f64 cell updated with a compare-and-swap loop
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn add(&self, delta: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// One test as run, kept only in debug mode
#[derive(Debug, Clone, PartialEq)]
pub struct MinorTestRecord {
    pub from: u8,
    pub to: u8,
    pub k: u32,
    pub n: u32,
    pub p_value: f64,
}

#[derive(Debug, Default)]
struct ClassStats {
    tests: AtomicU32,
    passed: AtomicU32,
    p_value_sum: AtomicF64,
    minor_reads: AtomicU64,
    total_reads: AtomicU64,
}

impl ClassStats {
    fn absorb(&self, other: &ClassStats) {
        self.tests
            .fetch_add(other.tests.load(Ordering::Relaxed), Ordering::Relaxed);
        self.passed
            .fetch_add(other.passed.load(Ordering::Relaxed), Ordering::Relaxed);
        self.p_value_sum.add(other.p_value_sum.get());
        self.minor_reads
            .fetch_add(other.minor_reads.load(Ordering::Relaxed), Ordering::Relaxed);
        self.total_reads
            .fetch_add(other.total_reads.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct MinorCaller {
    config: MinorCallerConfig,
    background_rate: f64,
    stats: Vec<ClassStats>,
    records: Mutex<Vec<MinorTestRecord>>,
}

/// Upper-tail Poisson probability of observing `k` or more events at rate
/// `lambda`, with half the point mass at `k` added as continuity correction
pub fn poisson_upper_tail(k: u32, lambda: f64) -> Option<f64> {
    let k = k as f64;
    let tail = checked_gamma_lr(k, lambda).ok()?;
    let point_mass = (k * lambda.ln() - lambda - ln_gamma(k + 1.0)).exp();
    let p = tail + 0.5 * point_mass;
    p.is_finite().then_some(p)
}

/// Post-hoc FDR of one class: `threshold * min(1, 2 * mean p) * tests / passed`
pub fn estimate_fdr(threshold: f64, p_value_sum: f64, tests: u32, passed: u32) -> f64 {
    if passed == 0 || tests == 0 {
        return 0.0;
    }
    let p_avg = p_value_sum / tests as f64;
    let fdr = threshold * (2.0 * p_avg).min(1.0) * tests as f64 / passed as f64;
    fdr.clamp(0.0, 1.0)
}

impl MinorCaller {
    pub fn new(config: &MinorCallerConfig) -> Self {
        Self {
            config: config.clone(),
            background_rate: config.background_error_rate(),
            stats: (0..CLASSES).map(|_| ClassStats::default()).collect(),
            records: Mutex::new(Vec::new()),
        }
    }

    fn class(&self, from: u8, to: u8) -> &ClassStats {
        &self.stats[from as usize * ALPHABET_SIZE + to as usize]
    }

    pub fn config(&self) -> &MinorCallerConfig {
        &self.config
    }

    /// Test `k` supporting reads out of `n` for a `from > to` minor mutation.
    ///
    /// Returns true when the minor is significant. Candidates with no support
    /// or fewer than 4 reads are rejected without being counted.
    pub fn call_and_update(&self, from: u8, to: u8, k: u32, n: u32) -> bool {
        if k == 0 || n < 4 {
            return false;
        }

        let lambda = n as f64 * self.background_rate;
        let p = match poisson_upper_tail(k, lambda) {
            Some(p) => p,
            None => {
                log::warn!(
                    "Poisson test failed for {}>{} with k={} n={}",
                    nucleotide::symbol_from_code(from),
                    nucleotide::symbol_from_code(to),
                    k,
                    n
                );
                return false;
            }
        };

        if self.config.debug {
            let mut records = match self.records.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            records.push(MinorTestRecord {
                from,
                to,
                k,
                n,
                p_value: p,
            });
        }

        let pass = p < self.config.p_value_threshold;

        let stats = self.class(from, to);
        stats.tests.fetch_add(1, Ordering::Relaxed);
        stats.p_value_sum.add(p);

        if pass {
            stats.passed.fetch_add(1, Ordering::Relaxed);
            stats.minor_reads.fetch_add(k as u64, Ordering::Relaxed);
            stats.total_reads.fetch_add(n as u64, Ordering::Relaxed);
        }

        pass
    }

    /// Merge two shards into a new caller; every cell is summed and debug
    /// records are concatenated
    pub fn combine(&self, other: &MinorCaller) -> MinorCaller {
        let combined = MinorCaller::new(&self.config);
        for (i, stats) in combined.stats.iter().enumerate() {
            stats.absorb(&self.stats[i]);
            stats.absorb(&other.stats[i]);
        }

        let mut records = self.debug_records();
        records.extend(other.debug_records());
        if let Ok(mut guard) = combined.records.lock() {
            *guard = records;
        }

        combined
    }

    pub fn compute_fdr(&self, from: u8, to: u8) -> f64 {
        estimate_fdr(
            self.config.p_value_threshold,
            self.p_value_sum(from, to),
            self.tests_run(from, to),
            self.tests_passed(from, to),
        )
    }

    /// FDR of every class, indexed `[from][to]`
    pub fn fdr_matrix(&self) -> [[f64; ALPHABET_SIZE]; ALPHABET_SIZE] {
        let mut matrix = [[0.0; ALPHABET_SIZE]; ALPHABET_SIZE];
        for (from, row) in matrix.iter_mut().enumerate() {
            for (to, cell) in row.iter_mut().enumerate() {
                *cell = self.compute_fdr(from as u8, to as u8);
            }
        }
        matrix
    }

    /// Fraction of reads carrying the minor across passing tests
    pub fn read_fraction_for_called_minors(&self, from: u8, to: u8) -> f64 {
        let stats = self.class(from, to);
        let total = stats.total_reads.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        stats.minor_reads.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn tests_run(&self, from: u8, to: u8) -> u32 {
        self.class(from, to).tests.load(Ordering::Relaxed)
    }

    pub fn tests_passed(&self, from: u8, to: u8) -> u32 {
        self.class(from, to).passed.load(Ordering::Relaxed)
    }

    pub fn p_value_sum(&self, from: u8, to: u8) -> f64 {
        self.class(from, to).p_value_sum.get()
    }

    pub fn minor_read_sum(&self, from: u8, to: u8) -> u64 {
        self.class(from, to).minor_reads.load(Ordering::Relaxed)
    }

    pub fn total_read_sum(&self, from: u8, to: u8) -> u64 {
        self.class(from, to).total_reads.load(Ordering::Relaxed)
    }

    pub fn total_tests(&self) -> u64 {
        self.stats
            .iter()
            .map(|s| s.tests.load(Ordering::Relaxed) as u64)
            .sum()
    }

    pub fn total_passed(&self) -> u64 {
        self.stats
            .iter()
            .map(|s| s.passed.load(Ordering::Relaxed) as u64)
            .sum()
    }

    pub fn debug_records(&self) -> Vec<MinorTestRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
