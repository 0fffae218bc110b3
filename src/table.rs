//! Per-reference aggregation of major/minor nucleotide evidence

use crate::alignment::LocalAlignment;
use crate::coverage::CoverageMatrix;
use crate::mutation::{Mutation, MutationCode};
use crate::nucleotide::ALPHABET_SIZE;
use crate::reference::{Reference, ReferenceLibrary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle of a mutations table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Empty,
    Accumulating,
    Finalized,
}

/// Evidence accumulated from all consensuses mapped to one reference.
///
/// `append` may be called from any number of threads at once; all counters
/// are atomic and the mutation set is behind a mutex.
#[derive(Debug)]
pub struct MutationsTable {
    reference: Arc<Reference>,
    mig_count: AtomicU64,
    major: CoverageMatrix,
    minor: CoverageMatrix,
    quality_sum: CoverageMatrix,
    // raw number of consensuses carrying each major mutation
    mutations: Mutex<HashMap<Mutation, u32>>,
    cleared: AtomicBool,
}

impl MutationsTable {
    pub fn new(reference: Arc<Reference>) -> Self {
        let len = reference.len();
        Self {
            reference,
            mig_count: AtomicU64::new(0),
            major: CoverageMatrix::new(len),
            minor: CoverageMatrix::new(len),
            quality_sum: CoverageMatrix::new(len),
            mutations: Mutex::new(HashMap::new()),
            cleared: AtomicBool::new(false),
        }
    }

    /// Record one aligned consensus.
    ///
    /// Every covered reference position is first credited to the reference
    /// base, then each major substitution moves that credit from the `from`
    /// base to the `to` base. Minor codes only increment the minor matrix.
    pub fn append(
        &self,
        alignment: &LocalAlignment,
        quality: &[u8],
        major_mutations: &[Mutation],
        minor_mutations: &[MutationCode],
    ) {
        if self.cleared.load(Ordering::Acquire) {
            log::warn!(
                "Ignoring consensus appended to finalized table for {}",
                self.reference.name()
            );
            return;
        }

        self.mig_count.fetch_add(1, Ordering::Relaxed);

        let range = alignment.reference_range();
        let end = (range.end as usize).min(self.reference.len());
        for pos in range.start as usize..end {
            let nt = self.reference.code_at(pos);

            if let Some(q) = self.quality_at(alignment, quality, pos) {
                self.quality_sum.increment_by(pos, nt, q);
            }

            self.major.increment(pos, nt);
        }

        for mutation in major_mutations {
            if let Mutation::Substitution(code) = mutation {
                let pos = code.position() as usize;
                if !(range.start as usize..end).contains(&pos) {
                    log::debug!("Skipping out of range major {}", code);
                    continue;
                }

                self.major.increment(pos, code.to_base());
                self.major.decrement(pos, code.from_base());

                if let Some(q) = self.quality_at(alignment, quality, pos) {
                    self.quality_sum.increment_by(pos, code.to_base(), q);
                    self.quality_sum.increment_by(pos, code.from_base(), -q);
                }
            }

            self.record(mutation);
        }

        for code in minor_mutations {
            let pos = code.position() as usize;
            if pos < self.reference.len() {
                self.minor.increment(pos, code.to_base());
            }
        }
    }

    fn quality_at(&self, alignment: &LocalAlignment, quality: &[u8], pos: usize) -> Option<i64> {
        alignment
            .convert_position(pos as u32)
            .and_then(|p| quality.get(p as usize))
            .map(|&q| q as i64)
    }

    fn record(&self, mutation: &Mutation) {
        let mut mutations = match self.mutations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *mutations.entry(mutation.clone()).or_insert(0) += 1;
    }

    pub fn reference(&self) -> &Arc<Reference> {
        &self.reference
    }

    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    /// Base with the highest major count; ties go to the lowest base code
    pub fn ancestral_base(&self, pos: usize) -> u8 {
        let mut best_base = 0u8;
        let mut best_count = 0i64;
        for base in 0..ALPHABET_SIZE as u8 {
            let count = self.major.get(pos, base);
            if count > best_count {
                best_count = count;
                best_base = base;
            }
        }
        best_base
    }

    pub fn major_count(&self, pos: usize, base: u8) -> u32 {
        u32::try_from(self.major.get(pos, base)).unwrap_or(0)
    }

    pub fn minor_count(&self, pos: usize, base: u8) -> u32 {
        u32::try_from(self.minor.get(pos, base)).unwrap_or(0)
    }

    /// Number of consensuses covering a position
    pub fn mig_coverage(&self, pos: usize) -> u32 {
        u32::try_from(self.major.total(pos)).unwrap_or(0)
    }

    /// Mean consensus quality of a base at a position, `None` if the base
    /// has no major support
    pub fn mean_quality(&self, pos: usize, base: u8) -> Option<f64> {
        let count = self.major.get(pos, base);
        (count > 0).then(|| self.quality_sum.get(pos, base) as f64 / count as f64)
    }

    /// Mean consensus quality over all bases at a position
    pub fn mean_quality_at(&self, pos: usize) -> Option<f64> {
        let count = self.major.total(pos);
        (count > 0).then(|| self.quality_sum.total(pos) as f64 / count as f64)
    }

    /// False when some mutation took over all coverage of the reference base
    pub fn has_reference_base(&self, pos: usize) -> bool {
        pos < self.reference.len() && self.major_count(pos, self.reference.code_at(pos)) > 0
    }

    pub fn mig_count(&self) -> u64 {
        self.mig_count.load(Ordering::Relaxed)
    }

    pub fn was_updated(&self) -> bool {
        self.mig_count() > 0
    }

    /// Snapshot of recorded major mutations in a stable order
    pub fn mutations(&self) -> Vec<Mutation> {
        let mutations = match self.mutations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut result: Vec<Mutation> = mutations.keys().cloned().collect();
        result.sort();
        result
    }

    /// Number of consensuses that carried a major mutation
    pub fn raw_mutation_count(&self, mutation: &Mutation) -> u32 {
        let mutations = match self.mutations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        mutations.get(mutation).copied().unwrap_or(0)
    }

    pub fn state(&self) -> TableState {
        if self.cleared.load(Ordering::Acquire) {
            TableState::Finalized
        } else if self.was_updated() {
            TableState::Accumulating
        } else {
            TableState::Empty
        }
    }

    /// Release all accumulated evidence; the table reports no coverage and
    /// no mutations afterwards.
    pub fn clear(&mut self) {
        self.cleared.store(true, Ordering::Release);
        self.mig_count.store(0, Ordering::Relaxed);
        self.major = CoverageMatrix::default();
        self.minor = CoverageMatrix::default();
        self.quality_sum = CoverageMatrix::default();
        match self.mutations.get_mut() {
            Ok(mutations) => *mutations = HashMap::new(),
            Err(poisoned) => *poisoned.into_inner() = HashMap::new(),
        }
    }
}

/// One mutations table per reference of a library
#[derive(Debug)]
pub struct TableLibrary {
    tables: Vec<MutationsTable>,
}

impl TableLibrary {
    pub fn new(library: &ReferenceLibrary) -> Self {
        Self {
            tables: library
                .references()
                .iter()
                .map(|r| MutationsTable::new(Arc::clone(r)))
                .collect(),
        }
    }

    pub fn table(&self, reference: usize) -> Option<&MutationsTable> {
        self.tables.get(reference)
    }

    pub fn table_mut(&mut self, reference: usize) -> Option<&mut MutationsTable> {
        self.tables.get_mut(reference)
    }

    pub fn tables(&self) -> &[MutationsTable] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total consensuses appended across all references
    pub fn total_migs(&self) -> u64 {
        self.tables.iter().map(|t| t.mig_count()).sum()
    }
}
