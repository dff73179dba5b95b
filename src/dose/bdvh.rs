use ndarray::{Array1, ArrayView2, Zip};

use crate::error::ConfigurationError;
use crate::simulator::BloodDistribution;

use super::histogram::DoseVolumeHistogram;
use super::tdvh::Tdvh;

/// Relative slack, in steps, used when matching step times to window and segment boundaries
const STEP_EPS: f64 = 1e-9;

/// Per-particle cumulative blood dose
///
/// Borrows a particle occupancy table and accumulates, for each particle, the dose received
/// while it occupies irradiated compartments. Calls to [Bdvh::add_dose] add up; overlapping
/// windows on the same compartment are counted twice, so callers must schedule them to be
/// disjoint when that is not intended.
#[derive(Debug, Clone)]
pub struct Bdvh<'a> {
    occupancy: ArrayView2<'a, usize>,
    dt: f64,
    ncompartments: usize,
    dose: Array1<f64>,
}

impl<'a> Bdvh<'a> {
    /// Accumulator over the particles of a simulated distribution
    pub fn new(distribution: &'a BloodDistribution) -> Self {
        Self {
            occupancy: distribution.occupancy(),
            dt: distribution.dt(),
            ncompartments: distribution.ncompartments(),
            dose: Array1::zeros(distribution.nparticles()),
        }
    }

    /// Accumulator over a raw particle x step occupancy table
    ///
    /// # Arguments
    ///
    /// * `occupancy` - Compartment index per particle (row) and step (column)
    /// * `dt` - Seconds per step
    /// * `ncompartments` - Number of compartments; valid organ indices are `0..ncompartments`
    pub fn from_table(
        occupancy: ArrayView2<'a, usize>,
        dt: f64,
        ncompartments: usize,
    ) -> Result<Self, ConfigurationError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(ConfigurationError::InvalidDuration {
                context: "time step".to_string(),
                value: dt,
            });
        }
        if ncompartments == 0 {
            return Err(ConfigurationError::EmptyCompartments);
        }
        if let Some(&organ) = occupancy.iter().find(|&&c| c >= ncompartments) {
            return Err(ConfigurationError::OrganOutOfRange {
                organ,
                ncompartments,
            });
        }
        Ok(Self {
            occupancy,
            dt,
            ncompartments,
            dose: Array1::zeros(occupancy.nrows()),
        })
    }

    /// Apply a dose schedule to one compartment
    ///
    /// Every step `t` with `t * dt` in `[start_time, start_time + tdvh.total_duration())`
    /// falls in exactly one segment. When that segment carries a dose rate and a particle
    /// occupies `organ` at step `t`, the particle receives `rate(organ) * dt`. Steps past the
    /// end of the table contribute nothing.
    ///
    /// # Errors
    ///
    /// Fails if `organ` is out of range, if `start_time` is negative or not finite, or if a
    /// segment yields a negative or non-finite dose rate. The accumulator is left unchanged
    /// on error.
    pub fn add_dose(
        &mut self,
        tdvh: &Tdvh,
        organ: usize,
        start_time: f64,
    ) -> Result<(), ConfigurationError> {
        if organ >= self.ncompartments {
            return Err(ConfigurationError::OrganOutOfRange {
                organ,
                ncompartments: self.ncompartments,
            });
        }
        if !start_time.is_finite() || start_time < 0.0 {
            return Err(ConfigurationError::InvalidStartTime(start_time));
        }

        let quanta = self.step_doses(tdvh, organ, start_time)?;
        if quanta.is_empty() {
            return Ok(());
        }

        Zip::from(&mut self.dose)
            .and(self.occupancy.rows())
            .par_for_each(|dose, path| {
                let received: f64 = quanta
                    .iter()
                    .filter(|(t, _)| path[*t] == organ)
                    .map(|(_, q)| q)
                    .sum();
                *dose += received;
            });
        Ok(())
    }

    /// Per-step dose quanta `(step, rate * dt)` of the schedule window, skipping zero steps
    fn step_doses(
        &self,
        tdvh: &Tdvh,
        organ: usize,
        start_time: f64,
    ) -> Result<Vec<(usize, f64)>, ConfigurationError> {
        let nsteps = self.occupancy.ncols();
        let first = (start_time / self.dt - STEP_EPS).ceil().max(0.0) as usize;
        let end = ((start_time + tdvh.total_duration()) / self.dt - STEP_EPS)
            .ceil()
            .max(0.0) as usize;
        if end > nsteps {
            log::warn!(
                "Dose window [{}, {}) s on organ {} extends past the simulated {} s",
                start_time,
                start_time + tdvh.total_duration(),
                organ,
                nsteps as f64 * self.dt
            );
        }
        let end = end.min(nsteps);
        log::debug!("Organ {}: dose window covers steps {}..{}", organ, first, end);

        let mut quanta = Vec::new();
        for t in first..end {
            let offset = t as f64 * self.dt - start_time + STEP_EPS * self.dt;
            let Some((k, segment)) = tdvh.segment_at(offset) else {
                continue;
            };
            let Some(rate) = segment.rate() else {
                continue;
            };
            let value = rate.evaluate(organ);
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidDoseRate {
                    segment: k,
                    organ,
                    value,
                });
            }
            if value > 0.0 {
                quanta.push((t, value * self.dt));
            }
        }
        Ok(quanta)
    }

    /// Cumulative dose per particle
    pub fn dose(&self) -> &Array1<f64> {
        &self.dose
    }

    pub fn into_dose(self) -> Array1<f64> {
        self.dose
    }

    pub fn nparticles(&self) -> usize {
        self.dose.len()
    }

    /// Seconds per step
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Population mean dose
    pub fn mean_dose(&self) -> f64 {
        self.dose.mean().unwrap_or(0.0)
    }

    /// Set every accumulator back to zero
    pub fn reset(&mut self) {
        self.dose.fill(0.0);
    }

    /// Differential dose-volume histogram of the current doses
    pub fn histogram(&self, bin_width: f64) -> Result<DoseVolumeHistogram, ConfigurationError> {
        DoseVolumeHistogram::from_doses(self.dose.as_slice().unwrap_or(&[]), bin_width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dose::DoseRate;
    use ndarray::array;

    #[test]
    fn rejects_out_of_range_organ() {
        let table = array![[0, 1, 1]];
        let mut bdvh = Bdvh::from_table(table.view(), 1.0, 2).unwrap();
        let tdvh = Tdvh::from_segments([(1.0, Some(DoseRate::Constant(1.0)))]).unwrap();
        assert_eq!(
            bdvh.add_dose(&tdvh, 2, 0.0),
            Err(ConfigurationError::OrganOutOfRange {
                organ: 2,
                ncompartments: 2
            })
        );
    }

    #[test]
    fn rejects_negative_start() {
        let table = array![[0, 1, 1]];
        let mut bdvh = Bdvh::from_table(table.view(), 1.0, 2).unwrap();
        let tdvh = Tdvh::from_segments([(1.0, Some(DoseRate::Constant(1.0)))]).unwrap();
        assert_eq!(
            bdvh.add_dose(&tdvh, 0, -1.0),
            Err(ConfigurationError::InvalidStartTime(-1.0))
        );
    }

    #[test]
    fn rejects_negative_rate_without_partial_update() {
        let table = array![[0, 0, 0]];
        let mut bdvh = Bdvh::from_table(table.view(), 1.0, 1).unwrap();
        let tdvh = Tdvh::from_segments([
            (1.0, Some(DoseRate::Constant(1.0))),
            (1.0, Some(DoseRate::Constant(-1.0))),
        ])
        .unwrap();
        assert!(matches!(
            bdvh.add_dose(&tdvh, 0, 0.0),
            Err(ConfigurationError::InvalidDoseRate { segment: 1, .. })
        ));
        assert_eq!(bdvh.dose()[0], 0.0);
    }

    #[test]
    fn only_counts_steps_in_target_organ() {
        let table = array![[0, 1, 0, 1], [1, 1, 1, 1]];
        let mut bdvh = Bdvh::from_table(table.view(), 0.5, 2).unwrap();
        let tdvh = Tdvh::from_segments([(2.0, Some(DoseRate::Constant(4.0)))]).unwrap();
        bdvh.add_dose(&tdvh, 0, 0.0).unwrap();
        // Two steps in organ 0, each worth 4.0 * 0.5
        assert_eq!(bdvh.dose().to_vec(), vec![4.0, 0.0]);
    }

    #[test]
    fn start_time_between_steps() {
        let table = array![[0, 0, 0, 0, 0]];
        let mut bdvh = Bdvh::from_table(table.view(), 1.0, 1).unwrap();
        let tdvh = Tdvh::from_segments([(2.0, Some(DoseRate::Constant(1.0)))]).unwrap();
        // Window [0.5, 2.5) holds steps 1 and 2
        bdvh.add_dose(&tdvh, 0, 0.5).unwrap();
        assert_eq!(bdvh.dose()[0], 2.0);
    }

    #[test]
    fn window_past_table_end_is_truncated() {
        let table = array![[0, 0, 0]];
        let mut bdvh = Bdvh::from_table(table.view(), 1.0, 1).unwrap();
        let tdvh = Tdvh::from_segments([(10.0, Some(DoseRate::Constant(1.0)))]).unwrap();
        bdvh.add_dose(&tdvh, 0, 1.0).unwrap();
        assert_eq!(bdvh.dose()[0], 2.0);
    }

    #[test]
    fn reset_clears_doses() {
        let table = array![[0, 0]];
        let mut bdvh = Bdvh::from_table(table.view(), 1.0, 1).unwrap();
        let tdvh = Tdvh::from_segments([(2.0, Some(DoseRate::Constant(1.0)))]).unwrap();
        bdvh.add_dose(&tdvh, 0, 0.0).unwrap();
        assert_eq!(bdvh.mean_dose(), 2.0);
        bdvh.reset();
        assert_eq!(bdvh.mean_dose(), 0.0);
    }
}
