mod distribution;
mod persistence;
mod progress;
pub mod sampling;

use std::path::Path;

use ndarray::ArrayViewMut1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::compartment::TransitionMatrix;
use crate::error::{BloodDvhError, ConfigurationError, PersistenceError};

pub use distribution::BloodDistribution;
pub use persistence::FORMAT_VERSION;

/// Seconds per simulated minute; `dt * resolution` must equal this.
pub const SECONDS_PER_MINUTE: f64 = 60.0;

const RESOLUTION_TOLERANCE: f64 = 1e-9;

/// A discrete-time transport process over compartments.
///
/// Implementors generate one particle trajectory at a time. They must be shareable between
/// threads, since particles are simulated in parallel.
pub trait Chain: Sync {
    /// Number of compartments
    fn nstates(&self) -> usize;

    /// Long-run distribution over compartments, used as the default initial placement
    ///
    /// Fails when the chain has no unique stationary distribution.
    fn equilibrium(&self) -> Result<Vec<f64>, ConfigurationError>;

    /// Write the trajectory starting in `start` into `path`, one compartment per step
    ///
    /// `path[0]` is always `start`. All draws come from `rng`.
    fn fill_path<R: Rng + ?Sized>(&self, start: usize, rng: &mut R, path: ArrayViewMut1<'_, usize>);
}

impl Chain for TransitionMatrix {
    fn nstates(&self) -> usize {
        TransitionMatrix::nstates(self)
    }

    fn equilibrium(&self) -> Result<Vec<f64>, ConfigurationError> {
        self.stationary_distribution().ok_or_else(|| {
            ConfigurationError::InvalidInitialDistribution {
                reason: "the chain has no unique stationary distribution".to_string(),
            }
        })
    }

    #[inline(always)]
    fn fill_path<R: Rng + ?Sized>(
        &self,
        start: usize,
        rng: &mut R,
        mut path: ArrayViewMut1<'_, usize>,
    ) {
        let mut current = start;
        for (t, slot) in path.iter_mut().enumerate() {
            if t > 0 {
                current = self.sampler(current).sample(rng);
            }
            *slot = current;
        }
    }
}

/// Placement of particles at step 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InitialDistribution {
    /// Proportional to the given non-negative weights, e.g. blood volume fractions
    Weights(Vec<f64>),
    /// Equal probability for every compartment
    Uniform,
    /// The long-run distribution of the chain
    Equilibrium,
    /// Every particle starts in the given compartment
    Fixed(usize),
}

impl InitialDistribution {
    /// Resolve to explicit weights for a chain with `nstates` compartments
    pub(crate) fn weights<C: Chain>(&self, chain: &C) -> Result<Vec<f64>, ConfigurationError> {
        let n = chain.nstates();
        match self {
            InitialDistribution::Weights(w) => {
                if w.len() != n {
                    return Err(ConfigurationError::InvalidInitialDistribution {
                        reason: format!("{} weights for {} compartments", w.len(), n),
                    });
                }
                Ok(w.clone())
            }
            InitialDistribution::Uniform => Ok(vec![1.0; n]),
            InitialDistribution::Equilibrium => chain.equilibrium(),
            InitialDistribution::Fixed(i) => {
                if *i >= n {
                    return Err(ConfigurationError::InvalidInitialDistribution {
                        reason: format!("compartment {} out of range for {} compartments", i, n),
                    });
                }
                let mut w = vec![0.0; n];
                w[*i] = 1.0;
                Ok(w)
            }
        }
    }
}

/// Options for particle simulation
///
/// Times are in seconds. `dt` (seconds per step) and `resolution` (steps per minute) must
/// describe the same step length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    /// Number of independent particles
    pub sample_size: usize,
    /// Seconds per step
    pub dt: f64,
    /// Steps per minute
    pub resolution: f64,
    /// Simulated time, in seconds
    pub duration: f64,
    /// Base seed; drawn from the thread generator when absent
    pub seed: Option<u64>,
    /// Initial placement; [InitialDistribution::Equilibrium] when absent
    pub initial: Option<InitialDistribution>,
    /// Show a progress bar on stderr
    pub show_progress: bool,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            sample_size: 1000,
            dt: 1.0,
            resolution: 60.0,
            duration: 60.0,
            seed: None,
            initial: None,
            show_progress: false,
        }
    }
}

impl SimulationOptions {
    /// Create new options
    ///
    /// # Arguments
    ///
    /// * `sample_size` - Number of particles
    /// * `dt` - Seconds per step
    /// * `resolution` - Steps per minute
    /// * `duration` - Simulated time, in seconds
    pub fn new(sample_size: usize, dt: f64, resolution: f64, duration: f64) -> Self {
        Self {
            sample_size,
            dt,
            resolution,
            duration,
            ..Self::default()
        }
    }

    /// Options for a given resolution; `dt` is derived as `60 / resolution`
    pub fn at_resolution(sample_size: usize, resolution: f64, duration: f64) -> Self {
        Self::new(
            sample_size,
            SECONDS_PER_MINUTE / resolution,
            resolution,
            duration,
        )
    }

    /// Load options from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, BloodDvhError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| PersistenceError::io(path, e))?;
        let options: Self = serde_json::from_str(&contents).map_err(PersistenceError::from)?;
        log::info!("Loaded simulation options from {}", path.display());
        Ok(options)
    }

    /// Fix the base seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the initial particle placement
    pub fn with_initial(mut self, initial: InitialDistribution) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Enable progress bar display
    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }

    /// Disable progress bar display
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Number of simulated steps, `ceil(duration / dt)`, at least one
    ///
    /// Exact multiples of `dt` are not rounded up by floating point noise.
    pub fn nsteps(&self) -> usize {
        let steps = self.duration / self.dt;
        let rounded = steps.round();
        let nsteps = if (steps - rounded).abs() <= RESOLUTION_TOLERANCE * steps.max(1.0) {
            rounded as usize
        } else {
            steps.ceil() as usize
        };
        nsteps.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sample_size < 1 {
            return Err(ConfigurationError::InvalidSampleSize(self.sample_size));
        }
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(ConfigurationError::InvalidDuration {
                context: "time step".to_string(),
                value: self.dt,
            });
        }
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(ConfigurationError::invalid_param(
                "resolution",
                self.resolution,
            ));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(ConfigurationError::InvalidDuration {
                context: "simulation".to_string(),
                value: self.duration,
            });
        }
        let expected = SECONDS_PER_MINUTE / self.resolution;
        if (self.dt - expected).abs() > RESOLUTION_TOLERANCE * expected {
            return Err(ConfigurationError::InconsistentResolution {
                dt: self.dt,
                resolution: self.resolution,
                expected,
            });
        }
        Ok(())
    }
}
