use std::fs::File;
use std::path::Path;

use csv::WriterBuilder;
use serde::Serialize;

use crate::error::{ConfigurationError, PersistenceError};

/// Upper bound on the number of bins a histogram may allocate
pub const MAX_BINS: usize = 1_000_000;

/// Differential dose-volume histogram of a particle dose sample
///
/// Bin `i` covers `[i * bin_width, (i + 1) * bin_width)`; the last bin also holds the
/// maximum dose. Each particle stands for an equal share of the blood volume.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseVolumeHistogram {
    bin_width: f64,
    counts: Vec<usize>,
    nparticles: usize,
}

#[derive(Serialize)]
struct HistogramRow {
    lower: f64,
    upper: f64,
    count: usize,
    fraction: f64,
    cumulative: f64,
}

impl DoseVolumeHistogram {
    /// Bin a dose sample
    ///
    /// # Errors
    ///
    /// Fails if the sample is empty, if `bin_width` is not positive, if a dose is negative
    /// or not finite, or if the bins would number more than [MAX_BINS].
    pub fn from_doses(doses: &[f64], bin_width: f64) -> Result<Self, ConfigurationError> {
        if doses.is_empty() {
            return Err(ConfigurationError::InvalidSampleSize(0));
        }
        if !bin_width.is_finite() || bin_width <= 0.0 {
            return Err(ConfigurationError::invalid_param("bin_width", bin_width));
        }
        if let Some(&bad) = doses.iter().find(|d| !d.is_finite() || **d < 0.0) {
            return Err(ConfigurationError::invalid_param("dose", bad));
        }

        let max = doses.iter().copied().fold(0.0, f64::max);
        let nbins = (max / bin_width).floor() + 1.0;
        if !nbins.is_finite() || nbins > MAX_BINS as f64 {
            return Err(ConfigurationError::invalid_param(
                "bin_width",
                format!("{} ({} bins for a maximum dose of {})", bin_width, nbins, max),
            ));
        }
        let nbins = nbins as usize;
        let mut counts = vec![0usize; nbins];
        for &dose in doses {
            let bin = ((dose / bin_width).floor() as usize).min(nbins - 1);
            counts[bin] += 1;
        }

        Ok(Self {
            bin_width,
            counts,
            nparticles: doses.len(),
        })
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    pub fn nbins(&self) -> usize {
        self.counts.len()
    }

    /// Particles per bin
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Bin edges, `nbins + 1` values starting at zero
    pub fn edges(&self) -> Vec<f64> {
        (0..=self.nbins())
            .map(|i| i as f64 * self.bin_width)
            .collect()
    }

    /// Fraction of the blood volume in each bin
    pub fn differential(&self) -> Vec<f64> {
        let n = self.nparticles as f64;
        self.counts.iter().map(|&c| c as f64 / n).collect()
    }

    /// Fraction of the blood volume receiving at least the lower edge of each bin
    pub fn cumulative(&self) -> Vec<f64> {
        let n = self.nparticles as f64;
        let mut remaining = self.nparticles;
        self.counts
            .iter()
            .map(|&c| {
                let fraction = remaining as f64 / n;
                remaining -= c;
                fraction
            })
            .collect()
    }

    /// Blood volume (L) in each bin for a given total blood volume
    pub fn volumes(&self, total_blood_volume: f64) -> Vec<f64> {
        self.differential()
            .into_iter()
            .map(|f| f * total_blood_volume)
            .collect()
    }

    /// Write the histogram as CSV with columns `lower,upper,count,fraction,cumulative`
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| PersistenceError::io(path, e))?;
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
        let edges = self.edges();
        let differential = self.differential();
        let cumulative = self.cumulative();
        for i in 0..self.nbins() {
            writer.serialize(HistogramRow {
                lower: edges[i],
                upper: edges[i + 1],
                count: self.counts[i],
                fraction: differential[i],
                cumulative: cumulative[i],
            })?;
        }
        writer.flush().map_err(|e| PersistenceError::io(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bins_doses() {
        let dvh = DoseVolumeHistogram::from_doses(&[0.0, 0.5, 1.0, 1.5, 3.0], 1.0).unwrap();
        assert_eq!(dvh.counts(), &[2, 2, 0, 1]);
        assert_eq!(dvh.edges(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(dvh.differential(), vec![0.4, 0.4, 0.0, 0.2]);
        assert_eq!(dvh.cumulative(), vec![1.0, 0.6, 0.2, 0.2]);
    }

    #[test]
    fn all_zero_doses_fill_first_bin() {
        let dvh = DoseVolumeHistogram::from_doses(&[0.0; 4], 0.1).unwrap();
        assert_eq!(dvh.counts(), &[4]);
        assert_eq!(dvh.volumes(5.0), vec![5.0]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(DoseVolumeHistogram::from_doses(&[], 1.0).is_err());
        assert!(DoseVolumeHistogram::from_doses(&[1.0], 0.0).is_err());
        assert!(DoseVolumeHistogram::from_doses(&[-1.0], 1.0).is_err());
    }

    #[test]
    fn rejects_too_many_bins() {
        assert!(matches!(
            DoseVolumeHistogram::from_doses(&[1.0], 1e-300),
            Err(ConfigurationError::InvalidParameter { .. })
        ));
        assert!(DoseVolumeHistogram::from_doses(&[1.0], 1e-7).is_err());
        let dvh = DoseVolumeHistogram::from_doses(&[1.0], 1e-5).unwrap();
        assert!((100_000..=100_001).contains(&dvh.nbins()));
    }

    #[test]
    fn writes_csv() {
        let dvh = DoseVolumeHistogram::from_doses(&[0.5, 1.5], 1.0).unwrap();
        let path = std::env::temp_dir().join(format!("blooddvh_dvh_{}.csv", std::process::id()));
        dvh.write_csv(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "lower,upper,count,fraction,cumulative");
        assert_eq!(lines.len(), 3);
    }
}
