//! Background error rate models for substitution classes

use crate::config::{ErrorModelType, VariantCallerConfig};
use crate::minor::MinorCaller;
use crate::nucleotide::ALPHABET_SIZE;
use crate::{UmivarError, UmivarResult};

type ClassMatrix = [[f64; ALPHABET_SIZE]; ALPHABET_SIZE];

/// Expected per-MIG error rate of a substitution class.
///
/// All back-ends answer the same question, the rate of `from > to` errors
/// at a position given its minor count and MIG coverage, so the caller does
/// not depend on which one is configured.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorModel {
    /// Scales the observed minor frequency by the chance that a PCR error
    /// made in one cycle becomes a major in the consensus
    MinorBased {
        order: f64,
        cycles: f64,
        lambda: f64,
        fdr: ClassMatrix,
    },
    /// Uses the observed minor frequency with a pseudocount
    RawData,
    /// Fixed rates supplied by the user
    Custom { rates: ClassMatrix },
}

impl ErrorModel {
    /// Build the configured model. The configuration is validated first.
    pub fn create(config: &VariantCallerConfig, minor_caller: &MinorCaller) -> UmivarResult<Self> {
        config.validate()?;

        let model = match config.error_model_type {
            ErrorModelType::MinorBased => ErrorModel::MinorBased {
                order: config.order,
                cycles: config.model_cycles,
                lambda: config.lambda(),
                fdr: minor_caller.fdr_matrix(),
            },
            ErrorModelType::RawData => ErrorModel::RawData,
            ErrorModelType::Custom => {
                let supplied = config.substitution_error_rates.as_ref().ok_or_else(|| {
                    UmivarError::InvalidConfig(
                        "(error model) Custom error model requires substitution rates".to_string(),
                    )
                })?;

                let mut rates = [[0.0; ALPHABET_SIZE]; ALPHABET_SIZE];
                for (from, row) in rates.iter_mut().enumerate() {
                    for (to, cell) in row.iter_mut().enumerate() {
                        if from != to {
                            *cell = supplied.get(from as u8, to as u8).unwrap_or(0.0);
                        }
                    }
                }
                ErrorModel::Custom { rates }
            }
        };

        log::debug!("Using {:?} error model", model.kind());
        Ok(model)
    }

    pub fn kind(&self) -> ErrorModelType {
        match self {
            ErrorModel::MinorBased { .. } => ErrorModelType::MinorBased,
            ErrorModel::RawData => ErrorModelType::RawData,
            ErrorModel::Custom { .. } => ErrorModelType::Custom,
        }
    }

    pub fn error_rate(&self, minor_count: u32, coverage: u32, from: u8, to: u8) -> f64 {
        let minor = minor_count as f64;
        let coverage = coverage as f64;

        let rate = match self {
            ErrorModel::MinorBased {
                order,
                cycles,
                lambda,
                fdr,
            } => {
                let fdr = fdr[from as usize][to as usize];
                let minor_rate = ((1.0 - fdr) * minor + 1.0) / (coverage + 1.0);
                (minor_rate / cycles) * (lambda / (1.0 + lambda)).powf(*order)
            }
            ErrorModel::RawData => (minor + 1.0) / (coverage + 1.0),
            ErrorModel::Custom { rates } => rates[from as usize][to as usize],
        };

        rate.clamp(0.0, 1.0)
    }
}
