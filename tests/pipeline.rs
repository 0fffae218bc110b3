use std::fs;
use tempfile::tempdir;
use umivar_rs::{
    output::{write_minor_matrix, write_position_report, write_variants},
    pipeline::Pipeline,
    simulate::{Simulation, SimulationConfig},
    utils::with_suffix,
    ErrorModelType, MinorCallerConfig, PipelineConfig, TableLibrary, VariantCaller,
    VariantCallerConfig,
};

fn small_simulation() -> Simulation {
    let config = SimulationConfig {
        reference_count: 2,
        reference_length: 30,
        migs_per_reference: 2000,
        seed: 7,
        ..SimulationConfig::default()
    };
    Simulation::new(&config).unwrap()
}

#[test]
fn end_to_end_writes_all_reports() {
    let simulation = small_simulation();
    let library = simulation.library();
    let mut tables = TableLibrary::new(library);

    let pipeline = Pipeline::new(
        &PipelineConfig::default().with_threads(2).with_buffer_size(64),
        &MinorCallerConfig::default(),
    )
    .unwrap();
    let output = pipeline.run(simulation.consensuses(), &tables).unwrap();
    assert_eq!(output.stats.consensuses(), 4000);
    assert_eq!(tables.total_migs(), 4000);

    let calls = VariantCaller::new(&VariantCallerConfig::default())
        .unwrap()
        .with_position_stats(true)
        .call(&mut tables, &output.minor_caller)
        .unwrap();
    assert!(!calls.is_empty());
    assert_eq!(calls.position_stats().len(), 60);

    let dir = tempdir().unwrap();
    let prefix = dir.path().join("out/sample");
    let variants = with_suffix(&prefix, ".variants.tsv");
    let minors = with_suffix(&prefix, ".minors.tsv");
    let positions = with_suffix(&prefix, ".positions.tsv");

    write_variants(&calls, library, &variants).unwrap();
    write_minor_matrix(&output.minor_caller, &minors).unwrap();
    write_position_report(&calls, library, &positions).unwrap();

    let content = fs::read_to_string(&variants).unwrap();
    let body: Vec<&str> = content
        .lines()
        .filter(|l| !l.starts_with('#'))
        .skip(1)
        .collect();
    assert_eq!(body.len(), calls.len());
    assert!(body.iter().all(|l| l.starts_with("sim")));

    assert_eq!(fs::read_to_string(&minors).unwrap().lines().count(), 17);
    assert_eq!(fs::read_to_string(&positions).unwrap().lines().count(), 61);
}

#[test]
fn tables_are_cleared_after_calling() {
    let simulation = small_simulation();
    let mut tables = TableLibrary::new(simulation.library());

    let pipeline = Pipeline::new(&PipelineConfig::default().with_threads(2), &MinorCallerConfig::default())
        .unwrap();
    let output = pipeline.run(simulation.consensuses(), &tables).unwrap();

    let caller = VariantCaller::new(&VariantCallerConfig::default()).unwrap();
    let first = caller.call(&mut tables, &output.minor_caller).unwrap();
    let second = caller.call(&mut tables, &output.minor_caller).unwrap();
    assert!(!first.is_empty());
    assert!(second.is_empty());
}

#[test]
fn raw_data_model_runs_on_the_same_sample() {
    let simulation = small_simulation();
    let mut tables = TableLibrary::new(simulation.library());

    let pipeline = Pipeline::new(&PipelineConfig::default().with_threads(3), &MinorCallerConfig::default())
        .unwrap();
    let output = pipeline.run(simulation.consensuses(), &tables).unwrap();

    let config = VariantCallerConfig::default().with_error_model_type(ErrorModelType::RawData);
    let calls = VariantCaller::new(&config)
        .unwrap()
        .call(&mut tables, &output.minor_caller)
        .unwrap();

    for variant in calls.variants() {
        assert!((0.0..=1.0).contains(&variant.error_rate()));
        assert!(variant.quality() >= 0.0);
    }
}
