use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use nalgebra::DMatrix;

use crate::error::{BloodDvhError, ConfigurationError, PersistenceError};

/// Inter-organ blood flow table
///
/// One row per compartment. `volumes[i]` is the share of the total blood volume held by
/// compartment `i`, in percent. `flows[(i, j)]` is the blood flow from compartment `i` into
/// compartment `j`, in percent of the cardiac output. Diagonal flows are not used.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowTable {
    names: Vec<String>,
    volumes: Vec<f64>,
    flows: DMatrix<f64>,
}

impl FlowTable {
    /// Create a new flow table
    ///
    /// # Arguments
    ///
    /// * `names` - Compartment names, in index order
    /// * `volumes` - Blood volume share per compartment (percent of total blood volume)
    /// * `flows` - Square matrix of flows from row to column (percent of cardiac output)
    ///
    /// # Errors
    ///
    /// Fails if the table is empty, if the dimensions disagree, or if any volume or flow is
    /// negative or not finite.
    pub fn new(
        names: Vec<String>,
        volumes: Vec<f64>,
        flows: DMatrix<f64>,
    ) -> Result<Self, ConfigurationError> {
        let n = names.len();
        if n == 0 {
            return Err(ConfigurationError::EmptyCompartments);
        }
        if volumes.len() != n {
            return Err(ConfigurationError::mismatch(format!(
                "{} compartment names but {} volumes",
                n,
                volumes.len()
            )));
        }
        if flows.nrows() != n || flows.ncols() != n {
            return Err(ConfigurationError::mismatch(format!(
                "{} compartments but a {}x{} flow matrix",
                n,
                flows.nrows(),
                flows.ncols()
            )));
        }

        for (name, &volume) in names.iter().zip(volumes.iter()) {
            if !volume.is_finite() || volume < 0.0 {
                return Err(ConfigurationError::InvalidVolume {
                    compartment: name.clone(),
                    value: volume,
                });
            }
        }

        for i in 0..n {
            for j in 0..n {
                let value = flows[(i, j)];
                if !value.is_finite() || value < 0.0 {
                    return Err(ConfigurationError::InvalidFlow {
                        from: names[i].clone(),
                        to: names[j].clone(),
                        value,
                    });
                }
            }
        }

        Ok(Self {
            names,
            volumes,
            flows,
        })
    }

    /// Read a flow table from a CSV file
    ///
    /// The header is `organ,<name_1>,...,<name_n>,volume` and each following row holds one
    /// compartment, in the same order as the header columns. Empty cells are read as zero.
    /// Lines starting with `#` are ignored.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, BloodDvhError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PersistenceError::io(path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(BufReader::new(file));

        let headers: Vec<String> = reader
            .headers()
            .map_err(PersistenceError::from)?
            .iter()
            .map(|h| h.to_string())
            .collect();

        if headers.len() < 3 {
            return Err(PersistenceError::schema(
                path,
                "expected at least the columns organ, <compartment>, volume",
            )
            .into());
        }
        if !headers[headers.len() - 1].eq_ignore_ascii_case("volume") {
            return Err(PersistenceError::schema(path, "last column must be 'volume'").into());
        }

        let names: Vec<String> = headers[1..headers.len() - 1].to_vec();
        let n = names.len();
        let mut flows = DMatrix::zeros(n, n);
        let mut volumes = Vec::with_capacity(n);

        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(PersistenceError::from)?;
            if row >= n {
                return Err(PersistenceError::schema(
                    path,
                    format!("more than {} compartment rows", n),
                )
                .into());
            }
            if record.len() != headers.len() {
                return Err(PersistenceError::schema(
                    path,
                    format!(
                        "row {} has {} cells, expected {}",
                        row + 1,
                        record.len(),
                        headers.len()
                    ),
                )
                .into());
            }

            let organ = record.get(0).unwrap_or_default();
            if organ != names[row] {
                return Err(PersistenceError::schema(
                    path,
                    format!(
                        "row {} is '{}', expected '{}' to match the header order",
                        row + 1,
                        organ,
                        names[row]
                    ),
                )
                .into());
            }

            for (col, cell) in record.iter().skip(1).take(n).enumerate() {
                flows[(row, col)] = parse_cell(cell, path, row, &names[col])?;
            }
            volumes.push(parse_cell(
                record.get(n + 1).unwrap_or_default(),
                path,
                row,
                "volume",
            )?);
        }

        if volumes.len() != n {
            return Err(PersistenceError::schema(
                path,
                format!("{} compartment rows, expected {}", volumes.len(), n),
            )
            .into());
        }

        Ok(Self::new(names, volumes, flows)?)
    }

    /// Number of compartments
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Blood volume share per compartment, in percent
    pub fn volumes(&self) -> &[f64] {
        &self.volumes
    }

    /// Flow matrix, in percent of cardiac output
    pub fn flows(&self) -> &DMatrix<f64> {
        &self.flows
    }

    /// Total outflow of compartment `i` into the other compartments, in percent of cardiac output
    pub fn outflow(&self, i: usize) -> f64 {
        (0..self.len())
            .filter(|&j| j != i)
            .map(|j| self.flows[(i, j)])
            .sum()
    }

    /// Total inflow into compartment `j` from the other compartments, in percent of cardiac output
    pub fn inflow(&self, j: usize) -> f64 {
        (0..self.len())
            .filter(|&i| i != j)
            .map(|i| self.flows[(i, j)])
            .sum()
    }

    /// Volume shares normalized to sum to one
    ///
    /// Returns `None` when every compartment has zero volume.
    pub fn volume_fractions(&self) -> Option<Vec<f64>> {
        let total: f64 = self.volumes.iter().sum();
        if total <= 0.0 {
            return None;
        }
        Some(self.volumes.iter().map(|v| v / total).collect())
    }
}

fn parse_cell(cell: &str, path: &Path, row: usize, column: &str) -> Result<f64, PersistenceError> {
    if cell.is_empty() {
        return Ok(0.0);
    }
    cell.parse::<f64>().map_err(|e| {
        PersistenceError::schema(
            path,
            format!("row {}, column '{}': '{}' ({})", row + 1, column, cell, e),
        )
    })
}
