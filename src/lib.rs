//! Blood dose estimation from compartmental blood flow.
//!
//! Blood particles are transported between organ compartments by a discrete-time chain
//! built from an inter-organ flow table. The simulated trajectories are combined with
//! time-dependent dose schedules to give every particle a cumulative dose, and hence a dose
//! distribution over the circulating blood volume.
//!
//! ```
//! use blooddvh::prelude::*;
//!
//! let markov = TransitionMatrix::from_rows(&[vec![0.9, 0.1], vec![0.2, 0.8]]).unwrap();
//! let options = SimulationOptions::at_resolution(100, 60.0, 30.0).with_seed(42);
//! let names = vec!["liver".to_string(), "body".to_string()];
//! let blood = BloodDistribution::generate_from_markov(&markov, names, 5.3, &options).unwrap();
//!
//! let mut tdvh = Tdvh::new();
//! tdvh.add(10.0, Some(DoseRate::Constant(0.1))).unwrap();
//!
//! let mut bdvh = Bdvh::new(&blood);
//! bdvh.add_dose(&tdvh, 0, 0.0).unwrap();
//! assert_eq!(bdvh.nparticles(), 100);
//! ```

pub mod compartment;
pub mod dose;
pub mod error;
pub mod simulator;

pub use crate::compartment::{
    CompartmentModel, FlowTable, Physiology, Sex, TransitionMatrix, WeibullChain,
};
pub use crate::dose::{Bdvh, DoseRate, DoseVolumeHistogram, Segment, Tdvh};
pub use crate::simulator::{BloodDistribution, Chain, InitialDistribution, SimulationOptions};
pub use error::{BloodDvhError, ConfigurationError, NumericalWarning, PersistenceError};
pub use nalgebra::dmatrix;

pub mod prelude {
    pub mod compartment {
        pub use crate::compartment::{
            Compartment, CompartmentModel, FlowTable, ModelSummary, Physiology, Sex,
            TransitionMatrix, WeibullChain, DEFAULT_SHAPE,
        };
    }
    pub mod simulator {
        pub use crate::simulator::{
            sampling::{derive_seed, particle_rng, Categorical},
            BloodDistribution, Chain, InitialDistribution, SimulationOptions,
        };
    }
    pub mod dose {
        pub use crate::dose::{Bdvh, DoseRate, DoseVolumeHistogram, Segment, Tdvh};
    }

    pub use crate::compartment::{
        CompartmentModel, FlowTable, Physiology, Sex, TransitionMatrix, WeibullChain,
        DEFAULT_SHAPE,
    };
    pub use crate::dose::{Bdvh, DoseRate, DoseVolumeHistogram, Segment, Tdvh};
    pub use crate::error::{BloodDvhError, ConfigurationError, PersistenceError};
    pub use crate::simulator::{
        BloodDistribution, Chain, InitialDistribution, SimulationOptions,
    };
    pub use nalgebra::dmatrix;
}
