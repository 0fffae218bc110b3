//! Configuration for the minor caller, variant caller and pipeline

use crate::nucleotide::{self, ALPHABET_SIZE};
use crate::utils::{get_num_cpus, is_gzipped, validate_file_exists};
use crate::{UmivarError, UmivarResult};
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Back-end used to estimate background error rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorModelType {
    /// Rates derived from the aggregated minor mutation matrix
    #[default]
    MinorBased,
    /// Rates derived from per-position minor noise only
    RawData,
    /// Fixed user-supplied substitution rates
    Custom,
}

impl std::str::FromStr for ErrorModelType {
    type Err = UmivarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minorbased" | "minor-based" | "minor" => Ok(Self::MinorBased),
            "rawdata" | "raw-data" | "raw" => Ok(Self::RawData),
            "custom" => Ok(Self::Custom),
            other => Err(UmivarError::InvalidConfig(format!(
                "Unknown error model type: {}",
                other
            ))),
        }
    }
}

/// User-supplied substitution rates, one per (from, to) class.
/// Diagonal entries are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionRates {
    rates: [[Option<f64>; ALPHABET_SIZE]; ALPHABET_SIZE],
}

#[derive(Debug, Deserialize)]
struct RateRecord {
    from: String,
    to: String,
    rate: f64,
}

impl SubstitutionRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, from: u8, to: u8, rate: f64) {
        self.rates[from as usize][to as usize] = Some(rate);
    }

    pub fn with_rate(mut self, from: u8, to: u8, rate: f64) -> Self {
        self.set(from, to, rate);
        self
    }

    pub fn get(&self, from: u8, to: u8) -> Option<f64> {
        self.rates[from as usize][to as usize]
    }

    /// Every off-diagonal rate set and inside [0, 1]
    pub fn validate(&self) -> UmivarResult<()> {
        for from in 0..ALPHABET_SIZE as u8 {
            for to in 0..ALPHABET_SIZE as u8 {
                if from == to {
                    continue;
                }
                match self.get(from, to) {
                    None => {
                        return Err(UmivarError::InvalidConfig(format!(
                            "(error model) Missing substitution rate for {}>{}",
                            nucleotide::symbol_from_code(from),
                            nucleotide::symbol_from_code(to)
                        )))
                    }
                    Some(rate) if !(0.0..=1.0).contains(&rate) => {
                        return Err(UmivarError::InvalidConfig(format!(
                            "(error model) Substitution rate for {}>{} should be in [0,1], got {}",
                            nucleotide::symbol_from_code(from),
                            nucleotide::symbol_from_code(to),
                            rate
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Load rates from a tab-separated `from\tto\trate` table, optionally
    /// gzip compressed
    pub fn from_tsv(path: &Path) -> UmivarResult<Self> {
        validate_file_exists(path)?;

        let file = File::open(path)?;
        let reader: Box<dyn Read> = if is_gzipped(path)? {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .from_reader(BufReader::new(reader));

        let mut rates = Self::new();
        for record in csv_reader.deserialize() {
            let record: RateRecord = record?;
            let from = parse_base(&record.from)?;
            let to = parse_base(&record.to)?;
            rates.set(from, to, record.rate);
        }

        log::debug!("Loaded substitution rates from {}", path.display());
        Ok(rates)
    }
}

fn parse_base(field: &str) -> UmivarResult<u8> {
    let code = match field.trim().as_bytes() {
        [symbol] => nucleotide::code_from_symbol(*symbol),
        _ => None,
    };
    code.ok_or_else(|| UmivarError::InvalidConfig(format!("Bad nucleotide in rate table: {}", field)))
}

/// Parameters of the minor significance test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinorCallerConfig {
    pub p_value_threshold: f64,
    /// Phred quality defining the background per-base error rate
    pub good_quality_threshold: u8,
    /// Keep a record for every test that was run
    pub debug: bool,
}

impl Default for MinorCallerConfig {
    fn default() -> Self {
        Self {
            p_value_threshold: 1e-3,
            good_quality_threshold: 25,
            debug: false,
        }
    }
}

impl MinorCallerConfig {
    pub fn with_p_value_threshold(&self, p_value_threshold: f64) -> Self {
        Self {
            p_value_threshold,
            ..self.clone()
        }
    }

    pub fn with_good_quality_threshold(&self, good_quality_threshold: u8) -> Self {
        Self {
            good_quality_threshold,
            ..self.clone()
        }
    }

    pub fn with_debug(&self, debug: bool) -> Self {
        Self {
            debug,
            ..self.clone()
        }
    }

    /// Background per-base error rate implied by the quality threshold
    pub fn background_error_rate(&self) -> f64 {
        10f64.powf(-(self.good_quality_threshold as f64) / 10.0)
    }

    pub fn validate(&self) -> UmivarResult<()> {
        if !(self.p_value_threshold > 0.0 && self.p_value_threshold < 1.0) {
            return Err(UmivarError::InvalidConfig(format!(
                "(minor caller) P-value threshold should be in (0,1), got {}",
                self.p_value_threshold
            )));
        }
        Ok(())
    }
}

/// Parameters of the error model and the filter chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantCallerConfig {
    pub order: f64,
    pub model_cycles: f64,
    pub model_efficiency: f64,
    pub quality_threshold: u32,
    pub singleton_frequency_threshold: u32,
    pub coverage_threshold: u32,
    pub base_quality_threshold: u8,
    pub error_model_type: ErrorModelType,
    pub no_indels: bool,
    pub substitution_error_rates: Option<SubstitutionRates>,
}

impl Default for VariantCallerConfig {
    fn default() -> Self {
        Self {
            order: 1.0,
            model_cycles: 20.0,
            model_efficiency: 1.95,
            quality_threshold: 20,
            singleton_frequency_threshold: 10000,
            coverage_threshold: 100,
            base_quality_threshold: 25,
            error_model_type: ErrorModelType::MinorBased,
            no_indels: false,
            substitution_error_rates: None,
        }
    }
}

impl VariantCallerConfig {
    pub fn with_order(&self, order: f64) -> Self {
        Self {
            order,
            ..self.clone()
        }
    }

    pub fn with_model_cycles(&self, model_cycles: f64) -> Self {
        Self {
            model_cycles,
            ..self.clone()
        }
    }

    pub fn with_model_efficiency(&self, model_efficiency: f64) -> Self {
        Self {
            model_efficiency,
            ..self.clone()
        }
    }

    pub fn with_quality_threshold(&self, quality_threshold: u32) -> Self {
        Self {
            quality_threshold,
            ..self.clone()
        }
    }

    pub fn with_singleton_frequency_threshold(&self, singleton_frequency_threshold: u32) -> Self {
        Self {
            singleton_frequency_threshold,
            ..self.clone()
        }
    }

    pub fn with_coverage_threshold(&self, coverage_threshold: u32) -> Self {
        Self {
            coverage_threshold,
            ..self.clone()
        }
    }

    pub fn with_base_quality_threshold(&self, base_quality_threshold: u8) -> Self {
        Self {
            base_quality_threshold,
            ..self.clone()
        }
    }

    pub fn with_error_model_type(&self, error_model_type: ErrorModelType) -> Self {
        Self {
            error_model_type,
            ..self.clone()
        }
    }

    pub fn with_no_indels(&self, no_indels: bool) -> Self {
        Self {
            no_indels,
            ..self.clone()
        }
    }

    pub fn with_substitution_error_rates(&self, rates: SubstitutionRates) -> Self {
        Self {
            substitution_error_rates: Some(rates),
            ..self.clone()
        }
    }

    /// Fractional growth per PCR cycle
    pub fn lambda(&self) -> f64 {
        self.model_efficiency - 1.0
    }

    pub fn validate(&self) -> UmivarResult<()> {
        if !(self.order > 0.0) {
            return Err(UmivarError::InvalidConfig(format!(
                "(model parameters) Model order should be positive, got {}",
                self.order
            )));
        }

        if !(10.0..=40.0).contains(&self.model_cycles) {
            return Err(UmivarError::InvalidConfig(format!(
                "(model parameters) Number of PCR cycles should be in [10,40], got {}",
                self.model_cycles
            )));
        }

        if !(self.model_efficiency >= 1.8 && self.model_efficiency < 2.0) {
            return Err(UmivarError::InvalidConfig(format!(
                "(model parameters) PCR efficiency should be in [1.8,2.0), got {}",
                self.model_efficiency
            )));
        }

        if self.singleton_frequency_threshold <= 1 {
            return Err(UmivarError::InvalidConfig(format!(
                "(filter parameters) Singleton frequency threshold should be greater than 1, got {}",
                self.singleton_frequency_threshold
            )));
        }

        if self.error_model_type == ErrorModelType::Custom {
            match &self.substitution_error_rates {
                Some(rates) => rates.validate()?,
                None => {
                    return Err(UmivarError::InvalidConfig(
                        "(error model) Custom error model requires substitution rates".to_string(),
                    ))
                }
            }
        }

        Ok(())
    }
}

/// Parameters of the consensus processing pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub threads: usize,
    /// Capacity of the channel between producer and workers
    pub buffer_size: usize,
    /// Stop after this many reads have been consumed
    pub max_reads: Option<u64>,
    pub consensus_quality_threshold: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threads: get_num_cpus(),
            buffer_size: 1024,
            max_reads: None,
            consensus_quality_threshold: 15,
        }
    }
}

impl PipelineConfig {
    pub fn with_threads(&self, threads: usize) -> Self {
        Self {
            threads,
            ..self.clone()
        }
    }

    pub fn with_buffer_size(&self, buffer_size: usize) -> Self {
        Self {
            buffer_size,
            ..self.clone()
        }
    }

    pub fn with_max_reads(&self, max_reads: Option<u64>) -> Self {
        Self {
            max_reads,
            ..self.clone()
        }
    }

    pub fn with_consensus_quality_threshold(&self, consensus_quality_threshold: u8) -> Self {
        Self {
            consensus_quality_threshold,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> UmivarResult<()> {
        if self.threads == 0 {
            return Err(UmivarError::InvalidConfig(
                "(pipeline) Number of threads must be positive".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(UmivarError::InvalidConfig(
                "(pipeline) Buffer size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
