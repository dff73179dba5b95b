use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rayon::prelude::*;

use crate::compartment::TransitionMatrix;
use crate::error::ConfigurationError;

use super::progress::SimulationProgress;
use super::sampling::{particle_rng, Categorical};
use super::{Chain, InitialDistribution, SimulationOptions};

/// Simulated blood particle trajectories
///
/// Holds the occupancy table, with one row per particle and one column per time step; each
/// cell is the index of the compartment the particle occupies at that step. The table is
/// produced once, by simulation or by [BloodDistribution::load], and is read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BloodDistribution {
    occupancy: Array2<usize>,
    dt: f64,
    names: Vec<String>,
    total_blood_volume: f64,
    seed: Option<u64>,
}

impl BloodDistribution {
    /// Assemble a distribution from an existing occupancy table
    ///
    /// # Errors
    ///
    /// Fails if `dt` or `total_blood_volume` is not positive, if there are no compartment
    /// names, or if the table references a compartment outside `0..names.len()`.
    pub fn from_parts(
        occupancy: Array2<usize>,
        dt: f64,
        names: Vec<String>,
        total_blood_volume: f64,
    ) -> Result<Self, ConfigurationError> {
        if names.is_empty() {
            return Err(ConfigurationError::EmptyCompartments);
        }
        if !dt.is_finite() || dt <= 0.0 {
            return Err(ConfigurationError::InvalidDuration {
                context: "time step".to_string(),
                value: dt,
            });
        }
        if !total_blood_volume.is_finite() || total_blood_volume <= 0.0 {
            return Err(ConfigurationError::invalid_param(
                "total_blood_volume",
                total_blood_volume,
            ));
        }
        if let Some(&organ) = occupancy.iter().find(|&&c| c >= names.len()) {
            return Err(ConfigurationError::OrganOutOfRange {
                organ,
                ncompartments: names.len(),
            });
        }
        Ok(Self {
            occupancy,
            dt,
            names,
            total_blood_volume,
            seed: None,
        })
    }

    /// Simulate `options.sample_size` independent particles through `chain`
    ///
    /// Each particle draws its initial compartment and its whole trajectory from its own
    /// random stream, derived from the base seed and the particle index. The result is
    /// therefore identical for a given seed regardless of thread scheduling.
    ///
    /// # Arguments
    ///
    /// * `chain` - Transport process, e.g. a [TransitionMatrix]
    /// * `names` - Compartment names, one per chain state
    /// * `total_blood_volume` - Patient total blood volume (L)
    /// * `options` - Sample size, time step, duration, seed and initial placement
    pub fn generate<C: Chain>(
        chain: &C,
        names: Vec<String>,
        total_blood_volume: f64,
        options: &SimulationOptions,
    ) -> Result<Self, ConfigurationError> {
        options.validate()?;
        if names.len() != chain.nstates() {
            return Err(ConfigurationError::mismatch(format!(
                "{} compartment names for a chain with {} states",
                names.len(),
                chain.nstates()
            )));
        }
        if !total_blood_volume.is_finite() || total_blood_volume <= 0.0 {
            return Err(ConfigurationError::invalid_param(
                "total_blood_volume",
                total_blood_volume,
            ));
        }

        let weights = options
            .initial
            .as_ref()
            .unwrap_or(&InitialDistribution::Equilibrium)
            .weights(chain)?;
        let initial = Categorical::new(&weights).ok_or_else(|| {
            ConfigurationError::InvalidInitialDistribution {
                reason: format!("weights {:?} cannot be normalized", weights),
            }
        })?;

        let seed = options.seed.unwrap_or_else(|| rand::rng().random());
        let nparticles = options.sample_size;
        let nsteps = options.nsteps();
        log::info!(
            "Simulating {} particles over {} steps of {} s (seed {})",
            nparticles,
            nsteps,
            options.dt,
            seed
        );

        let mut occupancy = Array2::<usize>::zeros((nparticles, nsteps));
        let progress = SimulationProgress::new(nparticles, options.show_progress);
        occupancy
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(particle, path)| {
                let mut rng = particle_rng(seed, particle);
                let start = initial.sample(&mut rng);
                chain.fill_path(start, &mut rng, path);
                progress.inc();
            });
        progress.finish();
        log::info!("Simulation complete");

        Ok(Self {
            occupancy,
            dt: options.dt,
            names,
            total_blood_volume,
            seed: Some(seed),
        })
    }

    /// Simulate particles through a Markov chain
    ///
    /// The transition matrix is validated on construction, so any [TransitionMatrix] is
    /// row-stochastic here.
    pub fn generate_from_markov(
        markov: &TransitionMatrix,
        names: Vec<String>,
        total_blood_volume: f64,
        options: &SimulationOptions,
    ) -> Result<Self, ConfigurationError> {
        Self::generate(markov, names, total_blood_volume, options)
    }

    /// The particle x step occupancy table
    pub fn occupancy(&self) -> ArrayView2<'_, usize> {
        self.occupancy.view()
    }

    /// Trajectory of a single particle
    pub fn path(&self, particle: usize) -> Option<ArrayView1<'_, usize>> {
        (particle < self.nparticles()).then(|| self.occupancy.row(particle))
    }

    /// Seconds per step
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn ncompartments(&self) -> usize {
        self.names.len()
    }

    /// Total blood volume (L)
    pub fn total_blood_volume(&self) -> f64 {
        self.total_blood_volume
    }

    pub fn nparticles(&self) -> usize {
        self.occupancy.nrows()
    }

    pub fn nsteps(&self) -> usize {
        self.occupancy.ncols()
    }

    /// Simulated time covered by the table, in seconds
    pub fn duration(&self) -> f64 {
        self.nsteps() as f64 * self.dt
    }

    /// Base seed of the simulation, if known
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub(crate) fn set_seed(&mut self, seed: Option<u64>) {
        self.seed = seed;
    }

    /// Fraction of particles in each compartment at each step
    ///
    /// Returns a `(nsteps, ncompartments)` array whose rows sum to one.
    pub fn occupancy_fractions(&self) -> Array2<f64> {
        let n = self.ncompartments();
        let nparticles = self.nparticles() as f64;
        let mut fractions = Array2::<f64>::zeros((self.nsteps(), n));
        fractions
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(self.occupancy.axis_iter(Axis(1)).into_par_iter())
            .for_each(|(mut row, column)| {
                for &c in column.iter() {
                    row[c] += 1.0;
                }
                row.mapv_inplace(|count| count / nparticles);
            });
        fractions
    }

    /// Fraction of all (particle, step) cells spent in each compartment
    pub fn compartment_fractions(&self) -> Vec<f64> {
        let n = self.ncompartments();
        let counts = self
            .occupancy
            .axis_iter(Axis(0))
            .into_par_iter()
            .fold(
                || vec![0usize; n],
                |mut counts, path| {
                    for &c in path.iter() {
                        counts[c] += 1;
                    }
                    counts
                },
            )
            .reduce(
                || vec![0usize; n],
                |mut a, b| {
                    a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                    a
                },
            );
        let total = self.occupancy.len() as f64;
        counts.into_iter().map(|c| c as f64 / total).collect()
    }
}
