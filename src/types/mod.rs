pub mod linalg;

pub use linalg::*;

use nalgebra::DVector;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// One sample tick across all channels.
pub type SensorFrame = DVector<f64>;

/// Contiguous run of `sampling_rate` frames, stored channel × time.
#[derive(Clone, Debug)]
pub struct SessionBlock {
    pub index: usize,
    pub samples: Array2<f64>,
}

impl SessionBlock {
    pub fn new(index: usize, samples: Array2<f64>) -> Self {
        Self { index, samples }
    }

    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of frames in the block.
    pub fn len(&self) -> usize {
        self.samples.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.ncols() == 0
    }

    pub fn frame(&self, tick: usize) -> SensorFrame {
        frame_from_view(self.samples.column(tick))
    }
}

pub fn frame_from_view(column: ArrayView1<f64>) -> SensorFrame {
    DVector::from_iterator(column.len(), column.iter().copied())
}

/// Posterior (or seed) of one (stream, bank, variant) pipeline.
#[derive(Clone, Debug)]
pub struct StateEstimate {
    /// Mean vector x
    pub mean: StateVec,

    /// Square-root factor S, S·Sᵀ ≈ P
    pub sqrt_cov: SqrtFactor,
}

impl StateEstimate {
    pub fn new(mean: StateVec, sqrt_cov: SqrtFactor) -> Self {
        Self { mean, sqrt_cov }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn covariance(&self) -> StateMat {
        covariance_from_factor(&self.sqrt_cov)
    }
}

/// Summary of a state estimate for logs and reports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EstimateSummary {
    pub mean_of_state: f64,
    pub covariance_trace: f64,
}

impl From<&StateEstimate> for EstimateSummary {
    fn from(estimate: &StateEstimate) -> Self {
        let n = estimate.dim().max(1) as f64;
        Self {
            mean_of_state: estimate.mean.sum() / n,
            covariance_trace: estimate.covariance().trace(),
        }
    }
}
