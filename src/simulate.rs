//! Synthetic UMI consensus generator with known truth
//!
//! Every reference position is assigned one of four roles:
//! - somatic: a true variant carried by a fixed fraction of molecules
//! - hot spot: a PCR error site producing correlated majors and minors
//! - background: a site with sporadic PCR minors and rare majors
//! - clean
//!
//! Each MIG additionally carries a read-level sequencing error with
//! probability `noise_per_mig`; those are seen in a single read and are
//! expected to fail the minor test.

use crate::alignment::{Consensus, LocalAlignment, MinorCandidate};
use crate::mutation::{Mutation, MutationCode};
use crate::nucleotide::{self, ALPHABET_SIZE};
use crate::reference::ReferenceLibrary;
use crate::{UmivarError, UmivarResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub reference_count: usize,
    pub reference_length: usize,
    pub migs_per_reference: usize,
    pub somatic_ratio: f64,
    pub somatic_frequency: f64,
    pub hot_spot_ratio: f64,
    /// Per-MIG rate of hot spot errors reaching the consensus
    pub hot_spot_rate: f64,
    /// Per-MIG rate of hot spot errors seen only in a subset of reads
    pub hot_spot_minor_rate: f64,
    pub background_ratio: f64,
    /// Per-MIG rate of PCR minors at background sites
    pub background_minor_rate: f64,
    /// Per-MIG rate of background errors reaching the consensus
    pub background_major_rate: f64,
    pub noise_per_mig: f64,
    pub min_reads: u32,
    pub max_reads: u32,
    pub quality: u8,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            reference_count: 3,
            reference_length: 50,
            migs_per_reference: 20000,
            somatic_ratio: 0.1,
            somatic_frequency: 0.001,
            hot_spot_ratio: 0.1,
            hot_spot_rate: 0.001,
            hot_spot_minor_rate: 0.05,
            background_ratio: 0.4,
            background_minor_rate: 0.01,
            background_major_rate: 0.0002,
            noise_per_mig: 0.5,
            min_reads: 8,
            max_reads: 40,
            quality: 40,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    pub fn total_migs(&self) -> usize {
        self.reference_count * self.migs_per_reference
    }

    pub fn validate(&self) -> UmivarResult<()> {
        if self.reference_count == 0 || self.reference_length == 0 {
            return Err(UmivarError::InvalidConfig(
                "(simulation) Need at least one reference of positive length".to_string(),
            ));
        }
        if self.min_reads < 4 || self.min_reads > self.max_reads {
            return Err(UmivarError::InvalidConfig(format!(
                "(simulation) Bad MIG size range [{}, {}]",
                self.min_reads, self.max_reads
            )));
        }
        if self.somatic_ratio + self.hot_spot_ratio + self.background_ratio > 1.0 {
            return Err(UmivarError::InvalidConfig(
                "(simulation) Site ratios sum above 1".to_string(),
            ));
        }
        let rates = [
            self.somatic_frequency,
            self.hot_spot_rate,
            self.hot_spot_minor_rate,
            self.background_minor_rate,
            self.background_major_rate,
            self.noise_per_mig,
        ];
        if rates.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(UmivarError::InvalidConfig(
                "(simulation) Rates must be in [0,1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Site {
    Clean,
    Somatic(u8),
    HotSpot(u8),
    Background,
}

/// The injected variants of a simulated sample
#[derive(Debug, Clone, Default)]
pub struct Truth {
    somatic: HashSet<(usize, MutationCode)>,
    hot_spots: HashSet<(usize, MutationCode)>,
    background: HashSet<(usize, u32)>,
}

impl Truth {
    pub fn is_somatic(&self, reference: usize, mutation: &Mutation) -> bool {
        matches!(mutation, Mutation::Substitution(code) if self.somatic.contains(&(reference, *code)))
    }

    pub fn is_hot_spot(&self, reference: usize, mutation: &Mutation) -> bool {
        matches!(mutation, Mutation::Substitution(code) if self.hot_spots.contains(&(reference, *code)))
    }

    pub fn is_background_site(&self, reference: usize, position: u32) -> bool {
        self.background.contains(&(reference, position))
    }

    pub fn somatic_count(&self) -> usize {
        self.somatic.len()
    }

    pub fn hot_spot_count(&self) -> usize {
        self.hot_spots.len()
    }
}

/// A simulated sample: the reference library, its truth and the generator
/// of consensuses
#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimulationConfig,
    library: ReferenceLibrary,
    sites: Vec<Vec<Site>>,
    truth: Truth,
}

fn random_other_base<R: Rng>(rng: &mut R, base: u8) -> u8 {
    (base + rng.random_range(1..ALPHABET_SIZE as u8)) % ALPHABET_SIZE as u8
}

impl Simulation {
    pub fn new(config: &SimulationConfig) -> UmivarResult<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut library = ReferenceLibrary::new();
        let mut sites = Vec::with_capacity(config.reference_count);
        let mut truth = Truth::default();

        for index in 0..config.reference_count {
            let codes: Vec<u8> = (0..config.reference_length)
                .map(|_| rng.random_range(0..ALPHABET_SIZE as u8))
                .collect();
            library.add(&format!("sim{}", index + 1), &nucleotide::decode(&codes))?;

            let reference_sites: Vec<Site> = codes
                .iter()
                .enumerate()
                .map(|(pos, &base)| {
                    let roll: f64 = rng.random();
                    let site = if roll < config.somatic_ratio {
                        Site::Somatic(random_other_base(&mut rng, base))
                    } else if roll < config.somatic_ratio + config.hot_spot_ratio {
                        Site::HotSpot(random_other_base(&mut rng, base))
                    } else if roll < config.somatic_ratio + config.hot_spot_ratio + config.background_ratio {
                        Site::Background
                    } else {
                        Site::Clean
                    };

                    let pos = pos as u32;
                    match site {
                        Site::Somatic(to) => {
                            truth.somatic.insert((index, MutationCode::substitution(pos, base, to)));
                        }
                        Site::HotSpot(to) => {
                            truth.hot_spots.insert((index, MutationCode::substitution(pos, base, to)));
                        }
                        Site::Background => {
                            truth.background.insert((index, pos));
                        }
                        Site::Clean => {}
                    }
                    site
                })
                .collect();
            sites.push(reference_sites);
        }

        log::info!(
            "Simulated {} references with {} somatic sites and {} hot spots",
            config.reference_count,
            truth.somatic_count(),
            truth.hot_spot_count()
        );

        Ok(Self {
            config: config.clone(),
            library,
            sites,
            truth,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn library(&self) -> &ReferenceLibrary {
        &self.library
    }

    pub fn truth(&self) -> &Truth {
        &self.truth
    }

    /// Deterministic stream of consensuses, references interleaved
    pub fn consensuses(&self) -> ConsensusStream {
        ConsensusStream {
            simulation: self.clone(),
            rng: StdRng::seed_from_u64(self.config.seed.wrapping_add(1)),
            emitted: 0,
        }
    }
}

pub struct ConsensusStream {
    simulation: Simulation,
    rng: StdRng,
    emitted: usize,
}

fn minor_candidate<R: Rng>(rng: &mut R, code: MutationCode, read_count: u32) -> MinorCandidate {
    let fraction = rng.random_range(0.1..=0.5);
    let supporting = ((read_count as f64 * fraction).round() as u32).max(3);
    MinorCandidate {
        code,
        supporting_reads: supporting.min(read_count),
        total_reads: read_count,
    }
}

impl ConsensusStream {
    fn generate(&mut self, reference: usize) -> Option<Consensus> {
        let config = &self.simulation.config;
        let rng = &mut self.rng;
        let ref_codes = self.simulation.library.get(reference)?.sequence();
        let sites = &self.simulation.sites[reference];

        let read_count = rng.random_range(config.min_reads..=config.max_reads);
        let mut majors = Vec::new();
        let mut minors = Vec::new();

        for (pos, (&base, site)) in ref_codes.iter().zip(sites.iter()).enumerate() {
            let pos = pos as u32;
            let major_to = match *site {
                Site::Somatic(to) if rng.random_bool(config.somatic_frequency) => Some(to),
                Site::HotSpot(to) if rng.random_bool(config.hot_spot_rate) => Some(to),
                Site::Background if rng.random_bool(config.background_major_rate) => {
                    Some(random_other_base(rng, base))
                }
                _ => None,
            };

            if let Some(to) = major_to {
                majors.push(MutationCode::substitution(pos, base, to));
                continue;
            }

            let minor_to = match *site {
                Site::HotSpot(to) if rng.random_bool(config.hot_spot_minor_rate) => Some(to),
                Site::Background if rng.random_bool(config.background_minor_rate) => {
                    Some(random_other_base(rng, base))
                }
                _ => None,
            };

            if let Some(to) = minor_to {
                let code = MutationCode::substitution(pos, base, to);
                minors.push(minor_candidate(rng, code, read_count));
            }
        }

        // single-read sequencing error
        if rng.random_bool(config.noise_per_mig) {
            let pos = rng.random_range(0..ref_codes.len());
            let base = ref_codes[pos];
            if !majors.iter().any(|m| m.position() == pos as u32) {
                let to = random_other_base(rng, base);
                minors.push(MinorCandidate {
                    code: MutationCode::substitution(pos as u32, base, to),
                    supporting_reads: 1,
                    total_reads: read_count,
                });
            }
        }

        let len = ref_codes.len() as u32;
        let alignment = match LocalAlignment::new(0..len, 0..len, majors) {
            Ok(alignment) => alignment,
            Err(e) => {
                log::warn!("Dropping malformed simulated consensus: {}", e);
                return None;
            }
        };

        Some(Consensus {
            reference,
            alignment,
            quality: vec![config.quality; ref_codes.len()],
            read_count,
            minors,
        })
    }
}

impl Iterator for ConsensusStream {
    type Item = Consensus;

    fn next(&mut self) -> Option<Consensus> {
        if self.emitted >= self.simulation.config.total_migs() {
            return None;
        }
        let reference = self.emitted % self.simulation.config.reference_count;
        self.emitted += 1;
        self.generate(reference)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.simulation.config.total_migs() - self.emitted;
        (remaining, Some(remaining))
    }
}
