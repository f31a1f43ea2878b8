//! Linear algebra type system for the square-root ensemble
//!
//! Filters work on dynamically sized nalgebra matrices because the bank
//! dimensions (all / significant / non-significant) depend on the
//! caller-supplied significance mask.

use nalgebra::{DMatrix, DVector};

// ===== Dimensions =====
pub const CHANNEL_COUNT: usize = 14; // EEG headset channels
pub const DEFAULT_SAMPLING_RATE: usize = 128; // samples per block [Hz]

/// Floor applied to D entries of LDL / U-D factorizations
pub const EPSILON: f64 = 1e-12;

// ===== Filter types =====
pub type StateVec = DVector<f64>;
pub type StateMat = DMatrix<f64>;

/// Square-root factor S with S·Sᵀ = P
pub type SqrtFactor = DMatrix<f64>;

/// n×n state transition
pub type TransitionMat = DMatrix<f64>;

/// h×n observation operator
pub type ObservationMat = DMatrix<f64>;

/// h×h diagonal measurement noise
pub type NoiseMat = DMatrix<f64>;

/// Rebuild P = S·Sᵀ from a square-root factor.
pub fn covariance_from_factor(s: &SqrtFactor) -> StateMat {
    s * s.transpose()
}

/// (P + Pᵀ) / 2
pub fn symmetrize(p: &StateMat) -> StateMat {
    (p + p.transpose()) * 0.5
}

pub fn all_finite(m: &DMatrix<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}
