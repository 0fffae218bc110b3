//! Recovery of injected somatic variants against PCR hot spots

use umivar_rs::{
    pipeline::Pipeline,
    simulate::{Simulation, SimulationConfig},
    MinorCallerConfig, PipelineConfig, TableLibrary, VariantCaller, VariantCallerConfig,
};

const QUALITY_CUTOFF: f64 = 25.0;

#[test]
fn somatic_variants_separate_from_hot_spots() {
    let simulation = Simulation::new(&SimulationConfig::default()).unwrap();
    let truth = simulation.truth();
    assert!(truth.somatic_count() > 0);
    assert!(truth.hot_spot_count() > 0);

    let mut tables = TableLibrary::new(simulation.library());
    let pipeline = Pipeline::new(&PipelineConfig::default(), &MinorCallerConfig::default()).unwrap();
    let output = pipeline.run(simulation.consensuses(), &tables).unwrap();

    let calls = VariantCaller::new(&VariantCallerConfig::default())
        .unwrap()
        .call(&mut tables, &output.minor_caller)
        .unwrap();

    let recovered = calls
        .variants()
        .iter()
        .filter(|v| truth.is_somatic(v.reference(), v.mutation()) && v.quality() >= QUALITY_CUTOFF)
        .count();
    let sensitivity = recovered as f64 / truth.somatic_count() as f64;
    assert!(sensitivity >= 0.9, "sensitivity {}", sensitivity);

    let hot_spots: Vec<_> = calls
        .variants()
        .iter()
        .filter(|v| truth.is_hot_spot(v.reference(), v.mutation()))
        .collect();
    assert!(!hot_spots.is_empty());
    let rejected = hot_spots.iter().filter(|v| v.quality() < QUALITY_CUTOFF).count();
    let specificity = rejected as f64 / hot_spots.len() as f64;
    assert!(specificity >= 0.95, "specificity {}", specificity);
}
