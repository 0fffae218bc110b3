//! Variant filters. Filters only annotate; failed variants stay in the call set.

use crate::caller::Variant;
use crate::config::VariantCallerConfig;

pub trait VariantFilter: Send + Sync {
    /// Short identifier used in the filter column
    fn id(&self) -> String;

    fn description(&self) -> String;

    fn passes(&self, variant: &Variant) -> bool;
}

/// Minimum variant quality score
#[derive(Debug, Clone)]
pub struct QualityFilter {
    threshold: u32,
}

impl QualityFilter {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }
}

impl VariantFilter for QualityFilter {
    fn id(&self) -> String {
        format!("q{}", self.threshold)
    }

    fn description(&self) -> String {
        format!("Quality below {}", self.threshold)
    }

    fn passes(&self, variant: &Variant) -> bool {
        variant.quality() >= self.threshold as f64
    }
}

/// Rejects variants seen in a single MIG at a frequency below `1 / ratio`
#[derive(Debug, Clone)]
pub struct SingletonFilter {
    ratio: u32,
}

impl SingletonFilter {
    pub fn new(ratio: u32) -> Self {
        Self { ratio }
    }
}

impl VariantFilter for SingletonFilter {
    fn id(&self) -> String {
        format!("si{}", self.ratio)
    }

    fn description(&self) -> String {
        format!("Singleton, frequency below 1/{}", self.ratio)
    }

    fn passes(&self, variant: &Variant) -> bool {
        variant.count() != 1 || variant.frequency() >= 1.0 / self.ratio as f64
    }
}

/// Minimum MIG coverage at the variant position
#[derive(Debug, Clone)]
pub struct CoverageFilter {
    threshold: u32,
}

impl CoverageFilter {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }
}

impl VariantFilter for CoverageFilter {
    fn id(&self) -> String {
        format!("c{}", self.threshold)
    }

    fn description(&self) -> String {
        format!("Coverage below {}", self.threshold)
    }

    fn passes(&self, variant: &Variant) -> bool {
        variant.coverage() >= self.threshold
    }
}

/// Quality, singleton and coverage filters, in that order
pub fn default_filters(config: &VariantCallerConfig) -> Vec<Box<dyn VariantFilter>> {
    vec![
        Box::new(QualityFilter::new(config.quality_threshold)),
        Box::new(SingletonFilter::new(config.singleton_frequency_threshold)),
        Box::new(CoverageFilter::new(config.coverage_threshold)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{Mutation, MutationCode};
    use crate::nucleotide::{A, G};

    fn variant(count: u32, coverage: u32, quality: f64) -> Variant {
        Variant::new(
            0,
            Mutation::Substitution(MutationCode::substitution(10, A, G)),
            count,
            0,
            coverage,
            quality,
            Some(35.0),
            1e-4,
            "A".to_string(),
            true,
        )
    }

    #[test]
    fn test_quality_filter() {
        let filter = QualityFilter::new(20);
        assert!(filter.passes(&variant(5, 1000, 20.0)));
        assert!(!filter.passes(&variant(5, 1000, 19.9)));
        assert_eq!(filter.id(), "q20");
    }

    #[test]
    fn test_singleton_filter() {
        let filter = SingletonFilter::new(10000);
        // 1 in 100 is frequent enough
        assert!(filter.passes(&variant(1, 100, 30.0)));
        // 1 in 20000 is not
        assert!(!filter.passes(&variant(1, 20000, 30.0)));
        // non-singletons always pass
        assert!(filter.passes(&variant(2, 20000, 30.0)));
    }

    #[test]
    fn test_coverage_filter() {
        let filter = CoverageFilter::new(100);
        assert!(filter.passes(&variant(5, 100, 30.0)));
        assert!(!filter.passes(&variant(5, 99, 30.0)));
    }

    #[test]
    fn test_default_filter_ids() {
        let filters = default_filters(&VariantCallerConfig::default());
        let ids: Vec<String> = filters.iter().map(|f| f.id()).collect();
        assert_eq!(ids, vec!["q20", "si10000", "c100"]);
    }
}
