//! Leaf models feeding the filters: transition matrix, synthetic
//! measurement noise and the initial square-root factor.

pub mod factorize;
pub mod noise;
pub mod transition;

pub use factorize::{cholesky_factor, empirical_covariance, initial_factor, ldl_decompose};
pub use noise::NoiseSynthesizer;
pub use transition::{taylor_transition, with_diagonal};
