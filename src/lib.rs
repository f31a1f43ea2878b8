//! Square-root ensemble Kalman engine for multichannel EEG recordings.
//!
//! Nine filter variants (three square-root propagators crossed with three
//! sequential assimilators) run independently over three sensor banks of
//! every recording.

pub mod ensemble;
pub mod error;
pub mod filters;
pub mod io;
pub mod model;
pub mod types;

pub use ensemble::{
    EnsembleConfig, EnsembleRun, EnsembleRunner, EstimationUnit, SensorBank, SensorPartition,
    UnitOutput, UnitStatus, VariantSeries,
};
pub use error::{EnsembleError, EnsembleResult};
pub use filters::{AssimilatorKind, FilterVariant, PropagatorKind};
pub use io::{BatchManifest, BatchReport, Recording};
