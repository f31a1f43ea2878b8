//! Ensemble orchestration: sensor banks, per-unit state machines and the
//! parallel runner.

pub mod bank;
pub mod config;
pub mod runner;
pub mod unit;

pub use bank::{SensorBank, SensorPartition};
pub use config::{parse_mask, EnsembleConfig};
pub use runner::{
    sanitize_for_handoff, EnsembleRun, EnsembleRunner, UnitOutcome, UnitPlan, UnitStatus,
    VariantSeries,
};
pub use unit::{EstimationUnit, StepRecord, UnitOutput, UnitState};
