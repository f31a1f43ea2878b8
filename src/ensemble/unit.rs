use serde::{Deserialize, Serialize};

use crate::ensemble::bank::{SensorBank, SensorPartition};
use crate::ensemble::config::EnsembleConfig;
use crate::error::{EnsembleError, EnsembleResult};
use crate::filters::FilterVariant;
use crate::model::{initial_factor, taylor_transition, NoiseSynthesizer};
use crate::types::{
    EstimateSummary, ObservationMat, SensorFrame, SessionBlock, StateEstimate, StateMat, StateVec,
};

// ─── Unit state ──────────────────────────────────────────────────────────────

/// Lifecycle of one estimation unit.
#[derive(Clone, Debug)]
pub enum UnitState {
    /// Holds the empirical covariance of the first block until the first step.
    Uninitialized { seed_covariance: StateMat },
    Streaming { estimate: StateEstimate },
}

/// Scalar summaries recorded for one sample tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepRecord {
    /// Mean of the a-priori state `F·x`
    pub predicted: f64,
    /// Mean of the next raw sample across all channels
    pub ground_truth: f64,
    /// Mean of the bank's observation vector
    pub observed: f64,
}

/// Per-block series produced by one unit.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UnitOutput {
    /// One vector per block, `sampling_rate` entries each
    pub predicted: Vec<Vec<f64>>,
    pub ground_truth: Vec<Vec<f64>>,
    /// Flat, one entry per sample
    pub observed: Vec<f64>,
    pub final_estimate: Option<EstimateSummary>,
}

impl UnitOutput {
    pub fn predicted_flat(&self) -> Vec<f64> {
        self.predicted.iter().flatten().copied().collect()
    }

    pub fn ground_truth_flat(&self) -> Vec<f64> {
        self.ground_truth.iter().flatten().copied().collect()
    }

    pub fn samples(&self) -> usize {
        self.observed.len()
    }
}

// ─── Estimation unit ─────────────────────────────────────────────────────────

/// One (bank, variant) pipeline over a single stream.
pub struct EstimationUnit {
    pub bank: SensorBank,
    pub variant: FilterVariant,
    partition: SensorPartition,
    sampling_rate: usize,
    channels: usize,
    observation: ObservationMat,
    process_noise: StateMat,
    epsilon: f64,
    noise: NoiseSynthesizer,
    state: UnitState,
    steps: u64,
}

impl EstimationUnit {
    pub fn new(
        bank: SensorBank,
        variant: FilterVariant,
        config: &EnsembleConfig,
        seed_covariance: StateMat,
        seed: u64,
    ) -> EnsembleResult<Self> {
        let partition = config.partition()?;
        let n = config.channel_count;
        if seed_covariance.shape() != (n, n) {
            return Err(EnsembleError::config(format!(
                "Seed covariance is {:?}, expected {}x{}",
                seed_covariance.shape(),
                n,
                n
            )));
        }
        Ok(Self {
            bank,
            variant,
            observation: partition.observation_matrix(bank),
            partition,
            sampling_rate: config.sampling_rate,
            channels: n,
            process_noise: StateMat::identity(n, n) * config.process_noise,
            epsilon: config.epsilon,
            noise: NoiseSynthesizer::new(seed),
            state: UnitState::Uninitialized { seed_covariance },
            steps: 0,
        })
    }

    pub fn state(&self) -> &UnitState {
        &self.state
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, UnitState::Streaming { .. })
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn estimate(&self) -> Option<&StateEstimate> {
        match &self.state {
            UnitState::Streaming { estimate } => Some(estimate),
            UnitState::Uninitialized { .. } => None,
        }
    }

    /// One predict/observe/propagate/assimilate cycle against `target`.
    pub fn step(&mut self, target: &SensorFrame) -> EnsembleResult<StepRecord> {
        if target.len() != self.channels {
            return Err(EnsembleError::input(format!(
                "Sample has {} channels, expected {}",
                target.len(),
                self.channels
            )));
        }

        // F is rebuilt every step so bank substitutions never accumulate
        let base = taylor_transition(self.sampling_rate, self.channels);
        let f = self.partition.bank_transition(self.bank, &base);

        let (mean, factor) = match &self.state {
            UnitState::Uninitialized { seed_covariance } => (
                StateVec::zeros(self.channels),
                initial_factor(seed_covariance, self.epsilon)?,
            ),
            UnitState::Streaming { estimate } => (estimate.mean.clone(), estimate.sqrt_cov.clone()),
        };

        let predicted_mean = &f * &mean;
        let y = &self.observation * target;
        let record = StepRecord {
            predicted: mean_of(&predicted_mean),
            ground_truth: mean_of(target),
            observed: mean_of(&y),
        };

        let r = self.noise.measurement_noise(y.len());
        let s_prior = self
            .variant
            .propagator
            .propagate(&factor, &f, &self.process_noise)?;
        let prior = StateEstimate::new(predicted_mean, s_prior);
        let posterior =
            self.variant
                .assimilator
                .assimilate(&prior, &self.observation, &r, &y, self.epsilon)?;

        self.state = UnitState::Streaming {
            estimate: posterior,
        };
        self.steps += 1;
        Ok(record)
    }

    /// Drive the unit over every block; the last sample of the stream targets
    /// the first sample of block 0.
    pub fn run(&mut self, blocks: &[SessionBlock]) -> EnsembleResult<UnitOutput> {
        let mut output = UnitOutput::default();
        for (bi, block) in blocks.iter().enumerate() {
            let mut predicted = Vec::with_capacity(block.len());
            let mut ground_truth = Vec::with_capacity(block.len());
            for tick in 0..block.len() {
                let target = next_sample(blocks, bi, tick);
                let record = self.step(&target)?;
                predicted.push(record.predicted);
                ground_truth.push(record.ground_truth);
                output.observed.push(record.observed);
            }
            output.predicted.push(predicted);
            output.ground_truth.push(ground_truth);
            log::debug!(
                "{} {} finished block {}/{}",
                self.variant,
                self.bank,
                bi + 1,
                blocks.len()
            );
        }
        output.final_estimate = self.estimate().map(EstimateSummary::from);
        Ok(output)
    }
}

/// Sample following `(block, tick)`, wrapping to the start of the stream.
pub fn next_sample(blocks: &[SessionBlock], block: usize, tick: usize) -> SensorFrame {
    let current = &blocks[block];
    if tick + 1 < current.len() {
        current.frame(tick + 1)
    } else {
        blocks[(block + 1) % blocks.len()].frame(0)
    }
}

fn mean_of(v: &StateVec) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.sum() / v.len() as f64
    }
}
