//! Variant calling from aggregated mutations tables
//!
//! Each major substitution recorded in a table is scored with a binomial
//! test: given `coverage` MIGs and the background rate `e` from the error
//! model, how surprising is it to see `count` or more MIGs carrying it.
//! The quality is `-10 * log10(p)`. Indels have no error model and get a
//! placeholder score.

use crate::config::VariantCallerConfig;
use crate::filter::{default_filters, VariantFilter};
use crate::minor::MinorCaller;
use crate::model::ErrorModel;
use crate::mutation::Mutation;
use crate::nucleotide::{self, ALPHABET_SIZE};
use crate::table::{MutationsTable, TableLibrary};
use crate::UmivarResult;
use statrs::distribution::{Binomial, Discrete, DiscreteCDF};
use statrs::function::factorial::ln_binomial;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Highest reportable quality score
pub const MAX_QUAL: f64 = 9999.0;

/// A called variant. Immutable once built; filter outcomes are kept in the
/// owning [`CallSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    reference: usize,
    mutation: Mutation,
    count: u32,
    minor_count: u32,
    coverage: u32,
    frequency: f64,
    quality: f64,
    mean_quality: Option<f64>,
    error_rate: f64,
    ancestral: String,
    has_reference: bool,
}

#[allow(clippy::too_many_arguments)]
impl Variant {
    pub fn new(
        reference: usize,
        mutation: Mutation,
        count: u32,
        minor_count: u32,
        coverage: u32,
        quality: f64,
        mean_quality: Option<f64>,
        error_rate: f64,
        ancestral: String,
        has_reference: bool,
    ) -> Self {
        let frequency = if coverage > 0 {
            count as f64 / coverage as f64
        } else {
            0.0
        };

        Self {
            reference,
            mutation,
            count,
            minor_count,
            coverage,
            frequency,
            quality,
            mean_quality,
            error_rate,
            ancestral,
            has_reference,
        }
    }

    pub fn reference(&self) -> usize {
        self.reference
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// 0-based start on the reference
    pub fn position(&self) -> u32 {
        self.mutation.start()
    }

    pub fn ref_allele(&self) -> String {
        self.mutation.ref_allele()
    }

    pub fn alt_allele(&self) -> String {
        self.mutation.alt_allele()
    }

    /// Number of MIGs carrying the variant
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn minor_count(&self) -> u32 {
        self.minor_count
    }

    pub fn coverage(&self) -> u32 {
        self.coverage
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn quality(&self) -> f64 {
        self.quality
    }

    pub fn mean_quality(&self) -> Option<f64> {
        self.mean_quality
    }

    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    pub fn ancestral(&self) -> &str {
        &self.ancestral
    }

    pub fn has_reference(&self) -> bool {
        self.has_reference
    }

    pub fn key(&self) -> VariantKey {
        VariantKey {
            reference: self.reference,
            mutation: self.mutation.clone(),
        }
    }

    /// Reference, position, alternate allele, then the mutation itself
    fn sort_order(&self, other: &Variant) -> Ordering {
        self.reference
            .cmp(&other.reference)
            .then_with(|| self.position().cmp(&other.position()))
            .then_with(|| self.alt_allele().cmp(&other.alt_allele()))
            .then_with(|| self.mutation.cmp(&other.mutation))
    }
}

/// Identity of a variant within a call set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    pub reference: usize,
    pub mutation: Mutation,
}

/// Outcome of the filter chain for one variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterStatus {
    Pass,
    /// Ids of the filters that rejected the variant
    Fail(Vec<String>),
}

impl FilterStatus {
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterStatus::Pass)
    }
}

impl std::fmt::Display for FilterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterStatus::Pass => write!(f, "PASS"),
            FilterStatus::Fail(ids) => write!(f, "{}", ids.join(";")),
        }
    }
}

/// Per-position diagnostics of one reference
#[derive(Debug, Clone, PartialEq)]
pub struct PositionStats {
    pub reference: usize,
    pub position: usize,
    pub has_reference: bool,
    pub coverage_ok: bool,
    pub quality_ok: bool,
    /// Major MIG counts per base
    pub counts: [u32; ALPHABET_SIZE],
    /// 1 - p of the binomial test per base, 0 for the reference base
    pub scores: [f64; ALPHABET_SIZE],
}

/// Sorted variants of one run together with their filter outcomes
#[derive(Debug, Default)]
pub struct CallSet {
    variants: Vec<Variant>,
    filters: Vec<(String, String)>,
    outcomes: HashMap<VariantKey, FilterStatus>,
    position_stats: Vec<PositionStats>,
}

impl CallSet {
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// (id, description) of every filter that was applied
    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    pub fn filter_status(&self, variant: &Variant) -> FilterStatus {
        self.outcomes
            .get(&variant.key())
            .cloned()
            .unwrap_or(FilterStatus::Pass)
    }

    pub fn passing(&self) -> impl Iterator<Item = &Variant> {
        self.variants
            .iter()
            .filter(move |v| self.filter_status(v).is_pass())
    }

    pub fn position_stats(&self) -> &[PositionStats] {
        &self.position_stats
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// P(X > k) + 0.5 * P(X = k) for X ~ Binomial(n, p).
///
/// No observation carries no evidence, so `k == 0` gives 1. Falls back to
/// the point mass computed from log terms when the distribution can not be
/// evaluated.
pub fn binomial_upper_tail(k: u32, n: u32, p: f64) -> f64 {
    if k == 0 {
        return 1.0;
    }
    if k > n {
        return 0.0;
    }

    match Binomial::new(p, n as u64) {
        Ok(dist) => {
            let tail = dist.sf(k as u64) + 0.5 * dist.pmf(k as u64);
            if tail.is_finite() {
                return tail.clamp(0.0, 1.0);
            }
            log::debug!("Binomial tail not finite for k={} n={} p={}", k, n, p);
        }
        Err(e) => log::debug!("Binomial({}, {}) unavailable: {}", n, p, e),
    }

    binomial_point_mass(k, n, p)
}

fn binomial_point_mass(k: u32, n: u32, p: f64) -> f64 {
    if p <= 0.0 {
        return if k == 0 { 1.0 } else { 0.0 };
    }
    if p >= 1.0 {
        return if k == n { 1.0 } else { 0.0 };
    }
    let ln_pmf =
        ln_binomial(n as u64, k as u64) + k as f64 * p.ln() + (n - k) as f64 * (1.0 - p).ln();
    let pmf = ln_pmf.exp();
    if pmf.is_finite() {
        pmf.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Phred-scaled score of a p-value, capped at [`MAX_QUAL`]
pub fn phred_score(p: f64) -> f64 {
    if p <= 0.0 {
        return MAX_QUAL;
    }
    (-10.0 * p.log10()).clamp(0.0, MAX_QUAL)
}

pub struct VariantCaller {
    config: VariantCallerConfig,
    filters: Vec<Box<dyn VariantFilter>>,
    collect_position_stats: bool,
}

impl VariantCaller {
    pub fn new(config: &VariantCallerConfig) -> UmivarResult<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            filters: default_filters(config),
            collect_position_stats: false,
        })
    }

    /// Also collect per-position diagnostics for every covered reference
    pub fn with_position_stats(mut self, collect: bool) -> Self {
        self.collect_position_stats = collect;
        self
    }

    pub fn config(&self) -> &VariantCallerConfig {
        &self.config
    }

    /// Call variants from every updated table. Each table is cleared once
    /// it has been processed, so calling again yields nothing.
    pub fn call(&self, tables: &mut TableLibrary, minor_caller: &MinorCaller) -> UmivarResult<CallSet> {
        let model = ErrorModel::create(&self.config, minor_caller)?;

        let mut call_set = CallSet {
            filters: self
                .filters
                .iter()
                .map(|f| (f.id(), f.description()))
                .collect(),
            ..CallSet::default()
        };

        for index in 0..tables.len() {
            let Some(table) = tables.table_mut(index) else {
                continue;
            };

            if !table.was_updated() {
                log::debug!("Skipping reference {} without coverage", table.reference().name());
                continue;
            }

            let before = call_set.variants.len();
            for mutation in table.mutations() {
                if let Some(variant) = self.build_variant(table, &model, mutation) {
                    let failed: Vec<String> = self
                        .filters
                        .iter()
                        .filter(|f| !f.passes(&variant))
                        .map(|f| f.id())
                        .collect();
                    if !failed.is_empty() {
                        call_set.outcomes.insert(variant.key(), FilterStatus::Fail(failed));
                    }
                    call_set.variants.push(variant);
                }
            }

            if self.collect_position_stats {
                call_set
                    .position_stats
                    .extend(self.position_stats(table, &model));
            }

            log::info!(
                "Reference {}: {} MIGs, {} variants",
                table.reference().name(),
                table.mig_count(),
                call_set.variants.len() - before
            );

            table.clear();
        }

        call_set.variants.sort_by(|a, b| a.sort_order(b));
        Ok(call_set)
    }

    fn build_variant(
        &self,
        table: &MutationsTable,
        model: &ErrorModel,
        mutation: Mutation,
    ) -> Option<Variant> {
        let reference = table.reference().index();

        match mutation {
            Mutation::Substitution(code) => {
                let pos = code.position() as usize;
                let to = code.to_base();

                let count = table.major_count(pos, to);
                assert!(
                    count > 0,
                    "Recorded major mutation {} has zero supporting MIGs",
                    code
                );

                let coverage = table.mig_coverage(pos);
                let minor_count = table.minor_count(pos, to);
                let error_rate = model.error_rate(minor_count, coverage, code.from_base(), to);
                let quality = phred_score(binomial_upper_tail(count, coverage, error_rate));
                let ancestral = nucleotide::symbol_from_code(table.ancestral_base(pos)).to_string();

                Some(Variant::new(
                    reference,
                    mutation,
                    count,
                    minor_count,
                    coverage,
                    quality,
                    table.mean_quality(pos, to),
                    error_rate,
                    ancestral,
                    table.has_reference_base(pos),
                ))
            }
            _ if self.config.no_indels => None,
            _ => {
                let pos = mutation.start() as usize;
                let count = table.raw_mutation_count(&mutation);
                let coverage = table.mig_coverage(pos);
                let mean_quality = table.mean_quality_at(pos);

                Some(Variant::new(
                    reference,
                    mutation,
                    count,
                    0,
                    coverage,
                    MAX_QUAL,
                    mean_quality,
                    0.0,
                    String::new(),
                    true,
                ))
            }
        }
    }

    fn position_stats(&self, table: &MutationsTable, model: &ErrorModel) -> Vec<PositionStats> {
        let reference = table.reference();
        (0..table.len())
            .map(|pos| {
                let ref_base = reference.code_at(pos);
                let coverage = table.mig_coverage(pos);

                let mut counts = [0u32; ALPHABET_SIZE];
                let mut scores = [0.0; ALPHABET_SIZE];
                for base in 0..ALPHABET_SIZE as u8 {
                    let count = table.major_count(pos, base);
                    counts[base as usize] = count;
                    if base != ref_base {
                        let rate =
                            model.error_rate(table.minor_count(pos, base), coverage, ref_base, base);
                        scores[base as usize] = 1.0 - binomial_upper_tail(count, coverage, rate);
                    }
                }

                PositionStats {
                    reference: reference.index(),
                    position: pos,
                    has_reference: table.has_reference_base(pos),
                    coverage_ok: coverage >= self.config.coverage_threshold,
                    quality_ok: table
                        .mean_quality(pos, ref_base)
                        .is_some_and(|q| q >= self.config.base_quality_threshold as f64),
                    counts,
                    scores,
                }
            })
            .collect()
    }
}
