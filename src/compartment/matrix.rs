use nalgebra::{DMatrix, DVector};

use crate::error::{ConfigurationError, NumericalWarning};
use crate::simulator::sampling::Categorical;

/// Row sums further than this from one are rejected.
pub const STOCHASTIC_TOLERANCE: f64 = 1e-6;

/// Row sums further than this from one (but within [STOCHASTIC_TOLERANCE]) are re-normalized.
pub const RENORMALIZATION_THRESHOLD: f64 = 1e-12;

/// Negative stationary probabilities beyond this signal a singular system.
const STATIONARY_TOLERANCE: f64 = 1e-9;

/// Row-stochastic one-step transition matrix of the compartment Markov chain
///
/// `P[(i, j)]` is the probability that a particle in compartment `i` is in compartment `j`
/// one time step later. The matrix is validated on construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    matrix: DMatrix<f64>,
    rows: Vec<Categorical>,
    warnings: Vec<NumericalWarning>,
}

impl TransitionMatrix {
    /// Validate and wrap a transition matrix
    ///
    /// Every entry must lie in `[0, 1]` and every row must sum to one within
    /// [STOCHASTIC_TOLERANCE]. Rows with a smaller, non-zero deviation are re-normalized and
    /// reported through [TransitionMatrix::warnings].
    pub fn new(matrix: DMatrix<f64>) -> Result<Self, ConfigurationError> {
        let n = matrix.nrows();
        if n == 0 {
            return Err(ConfigurationError::EmptyCompartments);
        }
        if matrix.ncols() != n {
            return Err(ConfigurationError::NotSquare {
                nrows: n,
                ncols: matrix.ncols(),
            });
        }

        let mut matrix = matrix;
        let mut warnings = Vec::new();
        for row in 0..n {
            for col in 0..n {
                let value = matrix[(row, col)];
                if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                    return Err(ConfigurationError::ProbabilityOutOfRange { row, col, value });
                }
            }

            let sum = matrix.row(row).sum();
            let deviation = (sum - 1.0).abs();
            if deviation > STOCHASTIC_TOLERANCE {
                return Err(ConfigurationError::NotRowStochastic { row, sum });
            }
            if deviation > RENORMALIZATION_THRESHOLD {
                let warning = NumericalWarning { row, sum };
                log::warn!("Transition matrix {}", warning);
                warnings.push(warning);
                for col in 0..n {
                    matrix[(row, col)] /= sum;
                }
            }
        }

        let rows = (0..n)
            .map(|row| {
                let weights: Vec<f64> = matrix.row(row).iter().copied().collect();
                Categorical::new(&weights).ok_or(ConfigurationError::NotRowStochastic {
                    row,
                    sum: 0.0,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            matrix,
            rows,
            warnings,
        })
    }

    /// Build a transition matrix from nested rows
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ConfigurationError> {
        let n = rows.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n) {
            return Err(ConfigurationError::mismatch(format!(
                "row {} has {} entries, expected {}",
                i,
                row.len(),
                n
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::new(DMatrix::from_row_slice(n, n, &flat))
    }

    /// Number of compartments (states)
    pub fn nstates(&self) -> usize {
        self.matrix.nrows()
    }

    /// Transition probability from `from` to `to`
    ///
    /// # Panics
    ///
    /// Panics if either index is not below [TransitionMatrix::nstates].
    pub fn get(&self, from: usize, to: usize) -> f64 {
        self.matrix[(from, to)]
    }

    /// Outgoing probabilities of compartment `i`
    ///
    /// # Panics
    ///
    /// Panics if `i` is not below [TransitionMatrix::nstates].
    pub fn row(&self, i: usize) -> Vec<f64> {
        self.matrix.row(i).iter().copied().collect()
    }

    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Rows that were re-normalized during construction
    pub fn warnings(&self) -> &[NumericalWarning] {
        &self.warnings
    }

    pub(crate) fn sampler(&self, i: usize) -> &Categorical {
        &self.rows[i]
    }

    /// Number of non-zero off-diagonal transitions
    pub fn nedges(&self) -> usize {
        let n = self.nstates();
        (0..n)
            .flat_map(|i| (0..n).map(move |j| (i, j)))
            .filter(|&(i, j)| i != j && self.matrix[(i, j)] > 0.0)
            .count()
    }

    /// Distribution over compartments after `steps` transitions from `initial`
    pub fn propagate(&self, initial: &[f64], steps: usize) -> Result<Vec<f64>, ConfigurationError> {
        if initial.len() != self.nstates() {
            return Err(ConfigurationError::mismatch(format!(
                "initial distribution has {} entries, expected {}",
                initial.len(),
                self.nstates()
            )));
        }
        let transposed = self.matrix.transpose();
        let mut p = DVector::from_column_slice(initial);
        for _ in 0..steps {
            p = &transposed * p;
        }
        Ok(p.iter().copied().collect())
    }

    /// Stationary distribution `pi = pi P`, solved directly
    ///
    /// Solves `(P^T - I) pi = 0` with one equation replaced by `sum(pi) = 1`, by LU
    /// decomposition. Returns `None` when the chain has more than one closed class, in which
    /// case the stationary distribution is not unique.
    pub fn stationary_distribution(&self) -> Option<Vec<f64>> {
        let n = self.nstates();
        let mut system = self.matrix.transpose() - DMatrix::<f64>::identity(n, n);
        system.row_mut(n - 1).fill(1.0);
        let mut rhs = DVector::<f64>::zeros(n);
        rhs[n - 1] = 1.0;

        let pi = system.lu().solve(&rhs)?;
        if pi.iter().any(|x| !x.is_finite() || *x < -STATIONARY_TOLERANCE) {
            return None;
        }
        let pi = pi.map(|x| x.max(0.0));
        let total = pi.sum();
        if total <= 0.0 {
            return None;
        }
        Some(pi.iter().map(|x| x / total).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn accepts_identity() {
        let p = TransitionMatrix::from_rows(&[vec![1.0]]).unwrap();
        assert_eq!(p.nstates(), 1);
        assert_eq!(p.nedges(), 0);
        assert!(p.warnings().is_empty());
    }

    #[test]
    fn rejects_non_stochastic_row() {
        let result = TransitionMatrix::from_rows(&[vec![0.5, 0.4], vec![0.5, 0.5]]);
        assert!(matches!(
            result,
            Err(ConfigurationError::NotRowStochastic { row: 0, .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_entry() {
        let result = TransitionMatrix::from_rows(&[vec![1.2, -0.2], vec![0.5, 0.5]]);
        assert!(matches!(
            result,
            Err(ConfigurationError::ProbabilityOutOfRange { row: 0, col: 0, .. })
        ));
    }

    #[test]
    fn rejects_non_square() {
        let result = TransitionMatrix::new(DMatrix::from_element(2, 3, 1.0 / 3.0));
        assert!(matches!(result, Err(ConfigurationError::NotSquare { .. })));
    }

    #[test]
    fn renormalizes_small_drift() {
        let p = TransitionMatrix::from_rows(&[vec![0.5, 0.5 + 1e-9], vec![0.25, 0.75]]).unwrap();
        assert_eq!(p.warnings().len(), 1);
        assert_eq!(p.warnings()[0].row, 0);
        assert_relative_eq!(p.row(0).iter().sum::<f64>(), 1.0, epsilon = 1e-15);
    }

    #[test]
    fn propagates_distribution() {
        let p = TransitionMatrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        let after_one = p.propagate(&[1.0, 0.0], 1).unwrap();
        assert_eq!(after_one, vec![0.0, 1.0]);
        let after_two = p.propagate(&[1.0, 0.0], 2).unwrap();
        assert_eq!(after_two, vec![1.0, 0.0]);
    }

    #[test]
    fn stationary_distribution_of_periodic_chain() {
        let p = TransitionMatrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        let pi = p.stationary_distribution().unwrap();
        assert_relative_eq!(pi[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(pi[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn stationary_distribution_of_biased_chain() {
        // pi = (2/3, 1/3) for this chain
        let p = TransitionMatrix::from_rows(&[vec![0.9, 0.1], vec![0.2, 0.8]]).unwrap();
        let pi = p.stationary_distribution().unwrap();
        assert_relative_eq!(pi[0], 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(pi[1], 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn stationary_distribution_of_slowly_mixing_chain() {
        // pi = (10/11, 1/11); power iteration is far from this after 1e5 steps
        let p = TransitionMatrix::from_rows(&[
            vec![1.0 - 1e-6, 1e-6],
            vec![1e-5, 1.0 - 1e-5],
        ])
        .unwrap();
        let pi = p.stationary_distribution().unwrap();
        assert_relative_eq!(pi[0], 10.0 / 11.0, epsilon = 1e-9);
        assert_relative_eq!(pi[1], 1.0 / 11.0, epsilon = 1e-9);
    }

    #[test]
    fn stationary_distribution_with_absorbing_state() {
        let p = TransitionMatrix::from_rows(&[vec![0.5, 0.5], vec![0.0, 1.0]]).unwrap();
        let pi = p.stationary_distribution().unwrap();
        assert_relative_eq!(pi[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(pi[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn stationary_distribution_is_not_unique_for_disjoint_classes() {
        let p = TransitionMatrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert!(p.stationary_distribution().is_none());
        let single = TransitionMatrix::from_rows(&[vec![1.0]]).unwrap();
        assert_eq!(single.stationary_distribution(), Some(vec![1.0]));
    }

    #[test]
    #[should_panic]
    fn get_out_of_range_panics() {
        let p = TransitionMatrix::from_rows(&[vec![1.0]]).unwrap();
        p.get(0, 1);
    }

    #[test]
    #[should_panic]
    fn row_out_of_range_panics() {
        let p = TransitionMatrix::from_rows(&[vec![1.0]]).unwrap();
        p.row(1);
    }
}
