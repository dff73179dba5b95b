use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use csv::WriterBuilder;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;

use super::BloodDistribution;

/// Version of the persisted particle path document
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PathRecord {
    version: u32,
    dt: f64,
    names: Vec<String>,
    total_blood_volume: f64,
    seed: Option<u64>,
    nparticles: usize,
    nsteps: usize,
    /// Row-major particle x step table
    occupancy: Vec<usize>,
}

impl BloodDistribution {
    /// Write the occupancy table and its metadata to `path` as JSON
    ///
    /// The document holds the table, the time step, the compartment names, the total blood
    /// volume and the seed. [BloodDistribution::load] restores it losslessly.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let record = PathRecord {
            version: FORMAT_VERSION,
            dt: self.dt(),
            names: self.names().to_vec(),
            total_blood_volume: self.total_blood_volume(),
            seed: self.seed(),
            nparticles: self.nparticles(),
            nsteps: self.nsteps(),
            occupancy: self.occupancy().iter().copied().collect(),
        };

        let file = File::create(path).map_err(|e| PersistenceError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &record)?;
        writer.flush().map_err(|e| PersistenceError::io(path, e))?;

        log::info!(
            "Saved {} particles x {} steps to {}",
            record.nparticles,
            record.nsteps,
            path.display()
        );
        Ok(())
    }

    /// Read a distribution written by [BloodDistribution::save]
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, malformed JSON, a different format version, or content that is
    /// inconsistent (shape, time step, compartment indices).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PersistenceError::io(path, e))?;
        let record: PathRecord = serde_json::from_reader(BufReader::new(file))?;

        if record.version != FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: record.version,
                expected: FORMAT_VERSION,
            });
        }

        let occupancy = Array2::from_shape_vec((record.nparticles, record.nsteps), record.occupancy)
            .map_err(|e| {
                PersistenceError::schema(
                    path,
                    format!(
                        "occupancy does not match {} particles x {} steps: {}",
                        record.nparticles, record.nsteps, e
                    ),
                )
            })?;

        let mut distribution = BloodDistribution::from_parts(
            occupancy,
            record.dt,
            record.names,
            record.total_blood_volume,
        )
        .map_err(|e| PersistenceError::schema(path, e.to_string()))?;
        distribution.set_seed(record.seed);

        log::info!(
            "Loaded {} particles x {} steps from {}",
            distribution.nparticles(),
            distribution.nsteps(),
            path.display()
        );
        Ok(distribution)
    }

    /// Export the occupancy table as CSV, one row per particle
    ///
    /// The header is `particle,<t_0>,...,<t_n>` with step times in seconds; cells hold
    /// compartment names.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| PersistenceError::io(path, e))?;
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

        let mut header = Vec::with_capacity(self.nsteps() + 1);
        header.push("particle".to_string());
        header.extend((0..self.nsteps()).map(|t| (t as f64 * self.dt()).to_string()));
        writer.write_record(&header)?;

        for (particle, path_row) in self.occupancy().rows().into_iter().enumerate() {
            let mut record = Vec::with_capacity(self.nsteps() + 1);
            record.push(particle.to_string());
            record.extend(path_row.iter().map(|&c| self.names()[c].clone()));
            writer.write_record(&record)?;
        }
        writer.flush().map_err(|e| PersistenceError::io(path, e))?;
        Ok(())
    }
}
