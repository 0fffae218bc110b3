//! umivar CLI: simulate a UMI sample, aggregate it and call variants

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;
use umivar_rs::{
    config::SubstitutionRates,
    output::{write_minor_matrix, write_position_report, write_variants},
    pipeline::Pipeline,
    simulate::{Simulation, SimulationConfig},
    utils::{format_file_size, get_num_cpus, log_memory_usage, validate_file_readable, with_suffix, Timer},
    ErrorModelType, MinorCallerConfig, PipelineConfig, TableLibrary, UmivarError,
    VariantCaller, VariantCallerConfig,
};

#[derive(Parser)]
#[command(name = "umivar")]
#[command(about = "umivar - UMI-aware variant calling with PCR error modelling")]
#[command(long_about = "
umivar aggregates UMI consensus sequences aligned to a set of references and calls
variants against a model of PCR and sequencing errors.

The run consists of three stages:
1. A sample of MIG consensuses is simulated with known somatic variants and PCR hot spots
2. Consensuses are processed by a worker pool: minor mutations are tested for
   significance and all evidence is aggregated per reference
3. Variants are scored with a binomial test against the error model and annotated
   by the quality, singleton and coverage filters

Output files are written next to the output prefix:
- <prefix>.variants.tsv: called variants with their filter status
- <prefix>.minors.tsv: minor caller statistics per substitution class
- <prefix>.positions.tsv: per-position diagnostics (with --position-report)

Append .gz to --suffix to gzip all outputs.
")]
struct Args {
    /// Prefix of output files
    #[arg(long, value_name = "PREFIX")]
    output_prefix: PathBuf,

    /// Extension appended to output file names
    #[arg(long, default_value = "tsv")]
    suffix: String,

    /// Number of simulated references
    #[arg(long, default_value_t = 3)]
    references: usize,

    /// Length of each simulated reference
    #[arg(long, default_value_t = 50)]
    reference_length: usize,

    /// Number of MIGs simulated per reference
    #[arg(long, default_value_t = 20000)]
    migs: usize,

    /// Frequency of somatic variants
    #[arg(long, default_value_t = 0.001)]
    somatic_frequency: f64,

    /// Per-MIG rate of hot spot PCR errors
    #[arg(long, default_value_t = 0.001)]
    hot_spot_rate: f64,

    /// Per-MIG rate of hot spot PCR errors seen only as minors
    #[arg(long, default_value_t = 0.05)]
    hot_spot_minor_rate: f64,

    /// Random seed of the simulation
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of worker threads
    #[arg(long, default_value_t = get_num_cpus())]
    threads: usize,

    /// Capacity of the consensus queue
    #[arg(long, default_value_t = 1024)]
    buffer_size: usize,

    /// Stop after this many reads
    #[arg(long)]
    max_reads: Option<u64>,

    /// Major substitutions at consensus bases with quality at or below this are ignored
    #[arg(long, default_value_t = 15)]
    consensus_quality: u8,

    /// P-value threshold of the minor test
    #[arg(long, default_value_t = 1e-3)]
    minor_p_value: f64,

    /// Phred quality defining the background sequencing error rate
    #[arg(long, default_value_t = 25)]
    good_quality: u8,

    /// Write every minor test instead of the per-class summary
    #[arg(long)]
    minor_debug: bool,

    /// Error model: minor-based, raw-data or custom
    #[arg(long, default_value = "minor-based")]
    error_model: ErrorModelType,

    /// Substitution rate table (from, to, rate) for the custom error model
    #[arg(long, value_name = "FILE")]
    substitution_rates: Option<PathBuf>,

    /// Number of PCR cycles
    #[arg(long, default_value_t = 20.0)]
    cycles: f64,

    /// PCR efficiency
    #[arg(long, default_value_t = 1.95)]
    efficiency: f64,

    /// Error model order
    #[arg(long, default_value_t = 1.0)]
    order: f64,

    /// Minimum variant quality
    #[arg(long, default_value_t = 20)]
    quality_threshold: u32,

    /// Singleton frequency ratio
    #[arg(long, default_value_t = 10000)]
    singleton_threshold: u32,

    /// Minimum MIG coverage
    #[arg(long, default_value_t = 100)]
    coverage_threshold: u32,

    /// Do not report indels
    #[arg(long)]
    no_indels: bool,

    /// Write per-position diagnostics
    #[arg(long)]
    position_report: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output files if they exist
    #[arg(short, long)]
    force: bool,
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting umivar");
    log::info!("Output prefix: {:?}", args.output_prefix);
    log::info!("Threads: {}", args.threads);

    let variants_path = with_suffix(&args.output_prefix, &format!(".variants.{}", args.suffix));
    let minors_path = with_suffix(&args.output_prefix, &format!(".minors.{}", args.suffix));
    let positions_path = with_suffix(&args.output_prefix, &format!(".positions.{}", args.suffix));

    if variants_path.exists() && !args.force {
        return Err(UmivarError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Output file {:?} already exists. Use --force to overwrite.", variants_path),
        ))
        .into());
    }

    // Configuration is validated before any consensus is processed
    let mut caller_config = VariantCallerConfig::default()
        .with_order(args.order)
        .with_model_cycles(args.cycles)
        .with_model_efficiency(args.efficiency)
        .with_quality_threshold(args.quality_threshold)
        .with_singleton_frequency_threshold(args.singleton_threshold)
        .with_coverage_threshold(args.coverage_threshold)
        .with_error_model_type(args.error_model)
        .with_no_indels(args.no_indels);

    if let Some(path) = &args.substitution_rates {
        validate_file_readable(path)?;
        let rates = SubstitutionRates::from_tsv(path)
            .with_context(|| format!("Failed to load substitution rates from {:?}", path))?;
        caller_config = caller_config.with_substitution_error_rates(rates);
    }
    caller_config.validate()?;

    let minor_config = MinorCallerConfig::default()
        .with_p_value_threshold(args.minor_p_value)
        .with_good_quality_threshold(args.good_quality)
        .with_debug(args.minor_debug);

    let pipeline_config = PipelineConfig::default()
        .with_threads(args.threads)
        .with_buffer_size(args.buffer_size)
        .with_max_reads(args.max_reads)
        .with_consensus_quality_threshold(args.consensus_quality);

    let simulation_config = SimulationConfig {
        reference_count: args.references,
        reference_length: args.reference_length,
        migs_per_reference: args.migs,
        somatic_frequency: args.somatic_frequency,
        hot_spot_rate: args.hot_spot_rate,
        hot_spot_minor_rate: args.hot_spot_minor_rate,
        seed: args.seed,
        ..SimulationConfig::default()
    };

    let pipeline = Pipeline::new(&pipeline_config, &minor_config)?;
    let caller = VariantCaller::new(&caller_config)?.with_position_stats(args.position_report);

    // Step 1: Simulate
    let simulation = {
        let _timer = Timer::new("Simulating sample");
        Simulation::new(&simulation_config)?
    };
    let library = simulation.library();

    // Step 2: Aggregate
    let mut tables = TableLibrary::new(library);
    let output = {
        let _timer = Timer::new("Aggregating consensuses");
        pipeline.run(simulation.consensuses(), &tables)?
    };
    log_memory_usage("after aggregation");

    // Step 3: Call
    let calls = {
        let _timer = Timer::new("Calling variants");
        caller.call(&mut tables, &output.minor_caller)?
    };
    log_memory_usage("after calling");

    let truth = simulation.truth();
    let passing = calls.passing().count();
    let recovered = calls
        .passing()
        .filter(|v| truth.is_somatic(v.reference(), v.mutation()))
        .count();
    let hot_spots = calls
        .passing()
        .filter(|v| truth.is_hot_spot(v.reference(), v.mutation()))
        .count();
    let background = calls
        .passing()
        .filter(|v| truth.is_background_site(v.reference(), v.position()))
        .count();

    log::info!("Variant summary:");
    log::info!("  Called: {} ({} passing filters)", calls.len(), passing);
    log::info!("  Somatic recovered: {} of {}", recovered, truth.somatic_count());
    log::info!("  Hot spots passing: {} of {}", hot_spots, truth.hot_spot_count());
    log::info!("  Passing calls at background sites: {}", background);

    write_variants(&calls, library, &variants_path)?;
    write_minor_matrix(&output.minor_caller, &minors_path)?;
    if args.position_report {
        write_position_report(&calls, library, &positions_path)?;
    }

    for path in [&variants_path, &minors_path] {
        if let Ok(size) = std::fs::metadata(path).map(|m| m.len()) {
            log::info!("{:?}: {}", path, format_file_size(size));
        }
    }

    log::info!("Analysis completed successfully");
    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: anyhow::Error) -> ! {
    match error.downcast_ref::<UmivarError>() {
        Some(UmivarError::FileNotFound(path)) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
        }
        Some(UmivarError::InvalidConfig(msg)) => {
            eprintln!("Error: Invalid configuration: {}", msg);
            eprintln!("Please check the PCR model, filter and minor test parameters.");
        }
        Some(UmivarError::InvalidSequence(msg)) | Some(UmivarError::InvalidMutation(msg)) => {
            eprintln!("Error: Invalid input data: {}", msg);
        }
        Some(UmivarError::UnknownReference(name)) => {
            eprintln!("Error: Unknown reference: {}", name);
        }
        Some(UmivarError::ThreadPool(msg)) => {
            eprintln!("Error: Worker pool failure: {}", msg);
            eprintln!("Try running with fewer --threads.");
        }
        Some(UmivarError::Io(e)) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        Some(UmivarError::Csv(e)) => {
            eprintln!("Error: Malformed table: {}", e);
            eprintln!("Substitution rate tables need a from, to, rate header.");
        }
        None => eprintln!("Error: {:#}", error),
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
