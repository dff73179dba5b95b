//! Dose schedules and blood dose accumulation.
//!
//! A [Tdvh] describes when, and at which rate, a compartment is irradiated. A [Bdvh] applies
//! such schedules to simulated particle paths and keeps one cumulative dose per particle,
//! which [DoseVolumeHistogram] turns into a population dose distribution.

mod bdvh;
mod histogram;
mod tdvh;

pub use bdvh::Bdvh;
pub use histogram::{DoseVolumeHistogram, MAX_BINS};
pub use tdvh::{DoseRate, Segment, Tdvh};
