//! # umivar - UMI-aware variant calling
//!
//! Aggregates per-position nucleotide evidence from many UMI consensus
//! sequences aligned to a reference library, estimates PCR and sequencing
//! error rates per substitution class and scores candidate variants
//! against that background.

pub mod alignment;
pub mod caller;
pub mod config;
pub mod coverage;
pub mod filter;
pub mod minor;
pub mod model;
pub mod mutation;
pub mod nucleotide;
pub mod output;
pub mod pipeline;
pub mod reference;
pub mod simulate;
pub mod table;
pub mod utils;

pub use caller::{CallSet, Variant, VariantCaller};
pub use config::{ErrorModelType, MinorCallerConfig, PipelineConfig, VariantCallerConfig};
pub use minor::MinorCaller;
pub use reference::{Reference, ReferenceLibrary};
pub use table::{MutationsTable, TableLibrary};

/// Error types for the umivar library
#[derive(Debug, thiserror::Error)]
pub enum UmivarError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

pub type UmivarResult<T> = Result<T, UmivarError>;
