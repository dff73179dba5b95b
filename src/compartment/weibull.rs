use ndarray::ArrayViewMut1;
use rand::Rng;
use rand_distr::{Distribution, Weibull};

use crate::compartment::TransitionMatrix;
use crate::error::ConfigurationError;
use crate::simulator::sampling::Categorical;
use crate::simulator::Chain;

/// Default Weibull shape of the residence time distribution
pub const DEFAULT_SHAPE: f64 = 2.0;

/// Time-dependent compartment chain with Weibull distributed residence times
///
/// On entering compartment `i` a particle stays for `max(1, ceil(W_i))` steps, where `W_i`
/// follows a Weibull distribution with scale `scales[i]` (in steps) and shape `shapes[i]`.
/// It then leaves for `j != i` with probability `P[i][j] / (1 - P[i][i])`. Compartments
/// without outflow, or with an infinite scale, are absorbing.
#[derive(Debug, Clone)]
pub struct WeibullChain {
    markov: TransitionMatrix,
    scales: Vec<f64>,
    shapes: Vec<f64>,
    dwell: Vec<Option<Weibull<f64>>>,
    jumps: Vec<Option<Categorical>>,
}

impl WeibullChain {
    /// Create a new chain
    ///
    /// # Arguments
    ///
    /// * `markov` - One-step transition matrix providing the jump probabilities
    /// * `scales` - Weibull scale per compartment, in steps (`f64::INFINITY` for no outflow)
    /// * `shapes` - Weibull shape per compartment
    pub fn new(
        markov: &TransitionMatrix,
        scales: Vec<f64>,
        shapes: Vec<f64>,
    ) -> Result<Self, ConfigurationError> {
        let n = markov.nstates();
        if scales.len() != n || shapes.len() != n {
            return Err(ConfigurationError::mismatch(format!(
                "{} compartments but {} scales and {} shapes",
                n,
                scales.len(),
                shapes.len()
            )));
        }

        let mut dwell = Vec::with_capacity(n);
        let mut jumps = Vec::with_capacity(n);
        for i in 0..n {
            let (scale, shape) = (scales[i], shapes[i]);
            if scale.is_nan() || scale <= 0.0 {
                return Err(ConfigurationError::invalid_param(
                    format!("weibull scale[{}]", i),
                    scale,
                ));
            }
            if !shape.is_finite() || shape <= 0.0 {
                return Err(ConfigurationError::invalid_param(
                    format!("weibull shape[{}]", i),
                    shape,
                ));
            }

            let weights: Vec<f64> = (0..n)
                .map(|j| if j == i { 0.0 } else { markov.get(i, j) })
                .collect();
            let jump = Categorical::new(&weights);

            if jump.is_none() || scale.is_infinite() {
                dwell.push(None);
                jumps.push(None);
                continue;
            }

            let distribution = Weibull::new(scale, shape).map_err(|e| {
                ConfigurationError::invalid_param(format!("weibull[{}]", i), e)
            })?;
            dwell.push(Some(distribution));
            jumps.push(jump);
        }

        Ok(Self {
            markov: markov.clone(),
            scales,
            shapes,
            dwell,
            jumps,
        })
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    pub fn shapes(&self) -> &[f64] {
        &self.shapes
    }

    /// Whether a particle entering compartment `i` never leaves
    pub fn is_absorbing(&self, i: usize) -> bool {
        self.jumps[i].is_none()
    }

    fn dwell_steps<R: Rng + ?Sized>(&self, i: usize, rng: &mut R) -> usize {
        match &self.dwell[i] {
            Some(distribution) => (distribution.sample(rng).ceil() as usize).max(1),
            None => usize::MAX,
        }
    }
}

impl Chain for WeibullChain {
    fn nstates(&self) -> usize {
        self.markov.nstates()
    }

    fn equilibrium(&self) -> Result<Vec<f64>, ConfigurationError> {
        self.markov.equilibrium()
    }

    fn fill_path<R: Rng + ?Sized>(
        &self,
        start: usize,
        rng: &mut R,
        mut path: ArrayViewMut1<'_, usize>,
    ) {
        let mut current = start;
        let mut remaining = self.dwell_steps(current, rng);
        for (t, slot) in path.iter_mut().enumerate() {
            if t > 0 {
                remaining -= 1;
                if remaining == 0 {
                    if let Some(jump) = &self.jumps[current] {
                        current = jump.sample(rng);
                    }
                    remaining = self.dwell_steps(current, rng);
                }
            }
            *slot = current;
        }
    }
}
