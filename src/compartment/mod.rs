mod flow;
mod matrix;
mod weibull;

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::simulator::{
    BloodDistribution, InitialDistribution, SimulationOptions, SECONDS_PER_MINUTE,
};

pub use flow::FlowTable;
pub use matrix::{TransitionMatrix, RENORMALIZATION_THRESHOLD, STOCHASTIC_TOLERANCE};
pub use weibull::{WeibullChain, DEFAULT_SHAPE};

/// Outflow probabilities above one by more than this are rejected
const OUTFLOW_TOLERANCE: f64 = 1e-12;

/// Biological sex, selecting the reference physiology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// ICRP 89 reference total blood volume (L)
    pub fn reference_blood_volume(&self) -> f64 {
        match self {
            Sex::Male => 5.3,
            Sex::Female => 3.9,
        }
    }

    /// ICRP 89 reference cardiac output (L/min)
    pub fn reference_cardiac_output(&self) -> f64 {
        match self {
            Sex::Male => 6.5,
            Sex::Female => 5.9,
        }
    }
}

/// Patient parameters scaling the flow table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Physiology {
    pub sex: Sex,
    /// Total blood volume (L)
    pub total_blood_volume: f64,
    /// Cardiac output (L/min)
    pub cardiac_output: f64,
}

impl Physiology {
    /// Reference adult for the given sex
    pub fn reference(sex: Sex) -> Self {
        Self {
            sex,
            total_blood_volume: sex.reference_blood_volume(),
            cardiac_output: sex.reference_cardiac_output(),
        }
    }

    pub fn with_total_blood_volume(mut self, litres: f64) -> Self {
        self.total_blood_volume = litres;
        self
    }

    pub fn with_cardiac_output(mut self, litres_per_minute: f64) -> Self {
        self.cardiac_output = litres_per_minute;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.total_blood_volume.is_finite() || self.total_blood_volume <= 0.0 {
            return Err(ConfigurationError::invalid_param(
                "total_blood_volume",
                self.total_blood_volume,
            ));
        }
        if !self.cardiac_output.is_finite() || self.cardiac_output <= 0.0 {
            return Err(ConfigurationError::invalid_param(
                "cardiac_output",
                self.cardiac_output,
            ));
        }
        Ok(())
    }
}

/// A modeled organ or region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compartment {
    /// Stable index, used by dose schedules to name target organs
    pub index: usize,
    pub name: String,
    /// Share of the total blood volume
    pub volume_fraction: f64,
    /// Blood volume (L), from the tabulated percentage of the total blood volume
    pub volume: f64,
}

/// Node and edge counts of the compartment flow graph
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub nodes: usize,
    /// Non-zero off-diagonal transitions
    pub edges: usize,
    pub names: Vec<String>,
    pub resolution: f64,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total number of nodes: {}", self.nodes)?;
        writeln!(f, "Total number of edges: {}", self.edges)?;
        writeln!(f, "Resolution: {} steps/min", self.resolution)?;
        write!(f, "Nodes: {}", self.names.join(", "))
    }
}

/// Compartmental model of blood circulation
///
/// Built from a [FlowTable] and a [Physiology]. Flows are converted to per-step transition
/// probabilities at a given resolution (steps per minute):
///
/// `P[i][j] = (flow[i][j] / 100) * (cardiac_output / resolution) / volume_i`
///
/// with `volume_i` in litres, and `P[i][i] = 1 - sum_{j != i} P[i][j]`. Matrices for other
/// resolutions are built on demand and cached.
#[derive(Debug, Clone)]
pub struct CompartmentModel {
    table: FlowTable,
    physiology: Physiology,
    resolution: f64,
    compartments: Vec<Compartment>,
    markov: Arc<TransitionMatrix>,
    cache: DashMap<u64, Arc<TransitionMatrix>>,
}

impl CompartmentModel {
    /// Build the model at the given resolution
    ///
    /// # Errors
    ///
    /// Fails if the physiology or resolution is invalid, if all compartment volumes are zero,
    /// if a compartment without volume has outflow, or if any compartment's outflow
    /// probability per step exceeds one (the resolution is too coarse for its flows).
    pub fn build(
        table: FlowTable,
        physiology: Physiology,
        resolution: f64,
    ) -> Result<Self, ConfigurationError> {
        physiology.validate()?;
        let fractions = table.volume_fractions().ok_or_else(|| {
            ConfigurationError::invalid_param("total compartment volume", 0.0)
        })?;

        for i in 0..table.len() {
            if table.flows()[(i, i)] > 0.0 {
                log::warn!(
                    "Ignoring self-flow of {}% in compartment '{}'",
                    table.flows()[(i, i)],
                    table.names()[i]
                );
            }
        }

        let markov = Arc::new(transition_matrix(&table, &physiology, resolution)?);
        let compartments = table
            .names()
            .iter()
            .zip(fractions)
            .enumerate()
            .map(|(index, (name, volume_fraction))| Compartment {
                index,
                name: name.clone(),
                volume_fraction,
                volume: physiology.total_blood_volume * table.volumes()[index] / 100.0,
            })
            .collect();

        let cache = DashMap::new();
        cache.insert(resolution.to_bits(), Arc::clone(&markov));

        let model = Self {
            table,
            physiology,
            resolution,
            compartments,
            markov,
            cache,
        };
        log::info!(
            "Built compartment model: {} compartments, {} edges at {} steps/min",
            model.compartments.len(),
            model.markov.nedges(),
            resolution
        );
        Ok(model)
    }

    /// Build the model for a patient
    ///
    /// # Arguments
    ///
    /// * `table` - Reference flow table for the patient's sex
    /// * `sex` - Patient sex
    /// * `total_blood_volume` - Total blood volume (L)
    /// * `cardiac_output` - Cardiac output (L/min)
    /// * `resolution` - Steps per minute
    pub fn for_patient(
        table: FlowTable,
        sex: Sex,
        total_blood_volume: f64,
        cardiac_output: f64,
        resolution: f64,
    ) -> Result<Self, ConfigurationError> {
        let physiology = Physiology::reference(sex)
            .with_total_blood_volume(total_blood_volume)
            .with_cardiac_output(cardiac_output);
        Self::build(table, physiology, resolution)
    }

    pub fn compartments(&self) -> &[Compartment] {
        &self.compartments
    }

    pub fn names(&self) -> Vec<String> {
        self.table.names().to_vec()
    }

    pub fn ncompartments(&self) -> usize {
        self.compartments.len()
    }

    pub fn table(&self) -> &FlowTable {
        &self.table
    }

    pub fn physiology(&self) -> &Physiology {
        &self.physiology
    }

    /// Steps per minute of [CompartmentModel::markov]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Seconds per step at the model resolution
    pub fn dt(&self) -> f64 {
        SECONDS_PER_MINUTE / self.resolution
    }

    /// Transition matrix at the model resolution
    pub fn markov(&self) -> &TransitionMatrix {
        &self.markov
    }

    /// Transition matrix at another resolution, built once and cached
    pub fn at_resolution(&self, resolution: f64) -> Result<Arc<TransitionMatrix>, ConfigurationError> {
        let key = resolution.to_bits();
        if let Some(markov) = self.cache.get(&key) {
            return Ok(Arc::clone(markov.value()));
        }
        let markov = Arc::new(transition_matrix(&self.table, &self.physiology, resolution)?);
        self.cache.insert(key, Arc::clone(&markov));
        Ok(markov)
    }

    /// Volume-weighted particle placement
    pub fn initial_distribution(&self) -> InitialDistribution {
        InitialDistribution::Weights(
            self.compartments
                .iter()
                .map(|c| c.volume_fraction)
                .collect(),
        )
    }

    /// Mean residence scale per compartment, in steps at the model resolution
    ///
    /// `volume_i / (cardiac_output / resolution * outflow_i / 100)`; infinite for
    /// compartments without outflow.
    pub fn residence_scales(&self) -> Vec<f64> {
        let per_step = self.physiology.cardiac_output / self.resolution;
        self.compartments
            .iter()
            .map(|c| {
                let outflow = per_step * self.table.outflow(c.index) / 100.0;
                if outflow > 0.0 {
                    c.volume / outflow
                } else {
                    f64::INFINITY
                }
            })
            .collect()
    }

    /// Time-dependent chain with Weibull residence times of the given shape
    pub fn weibull_chain(&self, shape: f64) -> Result<WeibullChain, ConfigurationError> {
        WeibullChain::new(
            &self.markov,
            self.residence_scales(),
            vec![shape; self.ncompartments()],
        )
    }

    /// Simulate particles through the model's Markov chain
    ///
    /// Uses volume-weighted initial placement unless `options` sets one. `options.dt` and
    /// `options.resolution` must match the model resolution.
    pub fn simulate(
        &self,
        options: &SimulationOptions,
    ) -> Result<BloodDistribution, ConfigurationError> {
        self.check_resolution(options)?;
        let options = self.with_default_initial(options);
        BloodDistribution::generate(
            self.markov(),
            self.names(),
            self.physiology.total_blood_volume,
            &options,
        )
    }

    /// Simulate particles through the Weibull residence-time chain
    pub fn simulate_weibull(
        &self,
        shape: f64,
        options: &SimulationOptions,
    ) -> Result<BloodDistribution, ConfigurationError> {
        self.check_resolution(options)?;
        let chain = self.weibull_chain(shape)?;
        let options = self.with_default_initial(options);
        BloodDistribution::generate(
            &chain,
            self.names(),
            self.physiology.total_blood_volume,
            &options,
        )
    }

    /// Node and edge counts of the flow graph
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            nodes: self.ncompartments(),
            edges: self.markov.nedges(),
            names: self.names(),
            resolution: self.resolution,
        }
    }

    fn check_resolution(&self, options: &SimulationOptions) -> Result<(), ConfigurationError> {
        if options.resolution != self.resolution {
            return Err(ConfigurationError::InconsistentResolution {
                dt: options.dt,
                resolution: options.resolution,
                expected: self.dt(),
            });
        }
        Ok(())
    }

    fn with_default_initial(&self, options: &SimulationOptions) -> SimulationOptions {
        let mut options = options.clone();
        if options.initial.is_none() {
            options.initial = Some(self.initial_distribution());
        }
        options
    }
}

/// Per-step transition probabilities for `table` at `resolution` steps per minute
fn transition_matrix(
    table: &FlowTable,
    physiology: &Physiology,
    resolution: f64,
) -> Result<TransitionMatrix, ConfigurationError> {
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(ConfigurationError::invalid_param("resolution", resolution));
    }

    let n = table.len();
    let per_step = physiology.cardiac_output / resolution;
    let mut p = DMatrix::<f64>::zeros(n, n);

    for i in 0..n {
        let volume = physiology.total_blood_volume * table.volumes()[i] / 100.0;
        if volume <= 0.0 {
            let outflow = table.outflow(i);
            if outflow > 0.0 {
                return Err(ConfigurationError::ZeroVolumeWithOutflow {
                    compartment: table.names()[i].clone(),
                    outflow,
                });
            }
            p[(i, i)] = 1.0;
            continue;
        }

        let mut outflow = 0.0;
        for j in (0..n).filter(|&j| j != i) {
            let pij = table.flows()[(i, j)] / 100.0 * per_step / volume;
            p[(i, j)] = pij;
            outflow += pij;
        }
        if outflow > 1.0 + OUTFLOW_TOLERANCE {
            return Err(ConfigurationError::ResolutionTooCoarse {
                row: i,
                compartment: table.names()[i].clone(),
                outflow,
                resolution,
            });
        }
        p[(i, i)] = (1.0 - outflow).max(0.0);
    }

    TransitionMatrix::new(p)
}
