use crossbeam::channel;
use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::ensemble::bank::SensorBank;
use crate::ensemble::config::EnsembleConfig;
use crate::ensemble::unit::{EstimationUnit, UnitOutput};
use crate::error::{EnsembleError, EnsembleResult};
use crate::filters::FilterVariant;
use crate::model::empirical_covariance;
use crate::types::{SessionBlock, StateMat};

// ─── Plans and outcomes ──────────────────────────────────────────────────────

/// Everything a worker needs to build and run one unit.
#[derive(Clone, Debug)]
pub struct UnitPlan {
    /// Position in the result list
    pub index: usize,
    pub bank: SensorBank,
    pub variant: FilterVariant,
    pub seed: u64,
    /// Replaces the empirical seed covariance when set
    pub seed_covariance: Option<StateMat>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum UnitStatus {
    Completed,
    Failed { reason: String },
}

impl UnitStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, UnitStatus::Completed)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub index: usize,
    /// `"{stream}_{variant}_{bank}"`
    pub label: String,
    pub bank: SensorBank,
    pub variant: FilterVariant,
    #[serde(flatten)]
    pub status: UnitStatus,
    pub elapsed_secs: f64,
    #[serde(skip)]
    pub output: Option<UnitOutput>,
}

/// Result of every unit run over one stream, in plan order.
#[derive(Clone, Debug)]
pub struct EnsembleRun {
    pub label: String,
    pub blocks: usize,
    pub sampling_rate: usize,
    pub outcomes: Vec<UnitOutcome>,
}

/// Seven series for one variant across the three banks. A bank whose unit
/// failed leaves its series empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariantSeries {
    pub ground_truth: Vec<f64>,
    pub predicted_all: Vec<f64>,
    pub predicted_significant: Vec<f64>,
    pub predicted_non_significant: Vec<f64>,
    pub observed_all: Vec<f64>,
    pub observed_significant: Vec<f64>,
    pub observed_non_significant: Vec<f64>,
}

impl VariantSeries {
    /// Values safe to hand to a consumer that only accepts finite `f32`.
    pub fn sanitized(&self) -> Self {
        Self {
            ground_truth: sanitize_for_handoff(&self.ground_truth),
            predicted_all: sanitize_for_handoff(&self.predicted_all),
            predicted_significant: sanitize_for_handoff(&self.predicted_significant),
            predicted_non_significant: sanitize_for_handoff(&self.predicted_non_significant),
            observed_all: sanitize_for_handoff(&self.observed_all),
            observed_significant: sanitize_for_handoff(&self.observed_significant),
            observed_non_significant: sanitize_for_handoff(&self.observed_non_significant),
        }
    }
}

/// NaN → 0, ±∞ → ±f32::MAX, everything clamped to the f32 range.
pub fn sanitize_for_handoff(values: &[f64]) -> Vec<f64> {
    let limit = f64::from(f32::MAX);
    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                0.0
            } else {
                v.clamp(-limit, limit)
            }
        })
        .collect()
}

impl EnsembleRun {
    pub fn outcome(&self, bank: SensorBank, variant: FilterVariant) -> Option<&UnitOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.bank == bank && o.variant == variant)
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|o| !o.status.is_completed())
    }

    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_completed()).count()
    }

    /// Distinct variants in plan order.
    pub fn variants(&self) -> Vec<FilterVariant> {
        let mut seen = Vec::new();
        for outcome in &self.outcomes {
            if !seen.contains(&outcome.variant) {
                seen.push(outcome.variant);
            }
        }
        seen
    }

    pub fn variant_series(&self, variant: FilterVariant) -> VariantSeries {
        let output = |bank: SensorBank| {
            self.outcome(bank, variant)
                .and_then(|o| o.output.as_ref())
        };
        let predicted = |bank: SensorBank| {
            output(bank)
                .map(UnitOutput::predicted_flat)
                .unwrap_or_default()
        };
        let observed = |bank: SensorBank| {
            output(bank)
                .map(|o| o.observed.clone())
                .unwrap_or_default()
        };

        let ground_truth = SensorBank::ALL
            .iter()
            .find_map(|&bank| output(bank))
            .map(UnitOutput::ground_truth_flat)
            .unwrap_or_default();

        VariantSeries {
            ground_truth,
            predicted_all: predicted(SensorBank::All),
            predicted_significant: predicted(SensorBank::Significant),
            predicted_non_significant: predicted(SensorBank::NonSignificant),
            observed_all: observed(SensorBank::All),
            observed_significant: observed(SensorBank::Significant),
            observed_non_significant: observed(SensorBank::NonSignificant),
        }
    }
}

// ─── Runner ──────────────────────────────────────────────────────────────────

/// Fans (bank × variant) units of one stream out over a worker pool.
pub struct EnsembleRunner {
    config: EnsembleConfig,
    variants: Vec<FilterVariant>,
}

impl EnsembleRunner {
    pub fn new(config: EnsembleConfig) -> EnsembleResult<Self> {
        config.validate()?;
        let variants = config.resolved_variants()?;
        Ok(Self { config, variants })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn variants(&self) -> &[FilterVariant] {
        &self.variants
    }

    /// One plan per selected (bank, variant), banks outermost.
    pub fn plan(&self, stream_label: &str) -> Vec<UnitPlan> {
        let stream_hash = fnv1a(stream_label.as_bytes());
        let mut plans = Vec::with_capacity(self.config.banks.len() * self.variants.len());
        for &bank in &self.config.banks {
            for &variant in &self.variants {
                let index = plans.len();
                plans.push(UnitPlan {
                    index,
                    bank,
                    variant,
                    seed: unit_seed(self.config.seed, stream_hash, bank, variant),
                    seed_covariance: None,
                });
            }
        }
        plans
    }

    pub fn run(&self, stream_label: &str, blocks: &[SessionBlock]) -> EnsembleResult<EnsembleRun> {
        let plans = self.plan(stream_label);
        self.run_plans(stream_label, blocks, plans)
    }

    /// Run `plans` over `blocks`. Input problems abort the whole call; a
    /// numerical failure only marks its own unit as failed.
    pub fn run_plans(
        &self,
        stream_label: &str,
        blocks: &[SessionBlock],
        plans: Vec<UnitPlan>,
    ) -> EnsembleResult<EnsembleRun> {
        self.check_blocks(blocks)?;
        let seed_covariance = empirical_covariance(&blocks[0])?;

        log::info!(
            "{}: {} units over {} blocks on {} workers",
            stream_label,
            plans.len(),
            blocks.len(),
            self.config.workers
        );

        let total = plans.len();
        let jobs: SegQueue<UnitPlan> = SegQueue::new();
        for plan in plans {
            jobs.push(plan);
        }
        let (done_tx, done_rx) = channel::unbounded::<UnitOutcome>();

        let workers = self.config.workers.min(total.max(1));
        crossbeam::thread::scope(|scope| {
            for _ in 0..workers {
                let jobs = &jobs;
                let done = done_tx.clone();
                let seed_covariance = &seed_covariance;
                scope.spawn(move |_| {
                    while let Some(plan) = jobs.pop() {
                        let outcome = self.execute(stream_label, blocks, seed_covariance, plan);
                        if done.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
        })
        .map_err(|_| EnsembleError::numerical("Estimation worker panicked"))?;
        drop(done_tx);

        let mut outcomes: Vec<UnitOutcome> = done_rx.iter().collect();
        outcomes.sort_by_key(|o| o.index);
        if outcomes.len() != total {
            return Err(EnsembleError::numerical(format!(
                "{} of {} units reported back",
                outcomes.len(),
                total
            )));
        }

        let run = EnsembleRun {
            label: stream_label.to_string(),
            blocks: blocks.len(),
            sampling_rate: self.config.sampling_rate,
            outcomes,
        };
        log::info!(
            "{}: {}/{} units completed",
            stream_label,
            run.completed(),
            total
        );
        Ok(run)
    }

    fn check_blocks(&self, blocks: &[SessionBlock]) -> EnsembleResult<()> {
        if blocks.is_empty() {
            return Err(EnsembleError::input("Stream has no complete block"));
        }
        for block in blocks {
            if block.channels() != self.config.channel_count {
                return Err(EnsembleError::input(format!(
                    "Block {} has {} channels, expected {}",
                    block.index,
                    block.channels(),
                    self.config.channel_count
                )));
            }
            if block.len() != self.config.sampling_rate {
                return Err(EnsembleError::input(format!(
                    "Block {} has {} samples, expected {}",
                    block.index,
                    block.len(),
                    self.config.sampling_rate
                )));
            }
        }
        Ok(())
    }

    fn execute(
        &self,
        stream_label: &str,
        blocks: &[SessionBlock],
        seed_covariance: &StateMat,
        plan: UnitPlan,
    ) -> UnitOutcome {
        let label = format!("{}_{}_{}", stream_label, plan.variant, plan.bank);
        let started = Instant::now();
        let covariance = plan
            .seed_covariance
            .unwrap_or_else(|| seed_covariance.clone());

        let result = EstimationUnit::new(plan.bank, plan.variant, &self.config, covariance, plan.seed)
            .and_then(|mut unit| unit.run(blocks));
        let elapsed_secs = started.elapsed().as_secs_f64();

        let (status, output) = match result {
            Ok(output) => {
                log::debug!("{} completed in {:.3}s", label, elapsed_secs);
                (UnitStatus::Completed, Some(output))
            }
            Err(e) => {
                log::warn!("{} failed after {:.3}s: {}", label, elapsed_secs, e);
                (UnitStatus::Failed { reason: e.to_string() }, None)
            }
        };

        UnitOutcome {
            index: plan.index,
            label,
            bank: plan.bank,
            variant: plan.variant,
            status,
            elapsed_secs,
            output,
        }
    }
}

// ─── Seeds ───────────────────────────────────────────────────────────────────

/// Deterministic per-unit seed, independent of scheduling order.
pub fn unit_seed(base: u64, stream_hash: u64, bank: SensorBank, variant: FilterVariant) -> u64 {
    let variant_index = FilterVariant::all()
        .iter()
        .position(|v| *v == variant)
        .unwrap_or(0) as u64;
    let mut z = base
        ^ stream_hash.rotate_left(17)
        ^ ((bank.index() as u64) << 8)
        ^ variant_index;
    // splitmix64 finalizer
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{AssimilatorKind, PropagatorKind};
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use std::collections::HashSet;

    fn eeg_like_blocks(rate: usize, blocks: usize) -> Vec<SessionBlock> {
        (0..blocks)
            .map(|b| {
                let samples = Array2::from_shape_fn((14, rate), |(c, t)| {
                    let k = (b * rate + t) as f64 / rate as f64;
                    4000.0
                        + 20.0 * (2.0 * std::f64::consts::PI * (8.0 + c as f64) * k).sin()
                        + 3.0 * ((c * 7 + t * 13) % 11) as f64
                });
                SessionBlock::new(b, samples)
            })
            .collect()
    }

    fn config(workers: usize) -> EnsembleConfig {
        EnsembleConfig {
            workers,
            seed: 11,
            ..EnsembleConfig::default()
        }
    }

    #[test]
    fn test_full_ensemble_two_blocks() {
        let blocks = eeg_like_blocks(128, 2);
        let runner = EnsembleRunner::new(config(4)).unwrap();
        let run = runner.run("S1", &blocks).unwrap();

        assert_eq!(run.outcomes.len(), 27);
        assert_eq!(run.completed(), 27, "failures: {:?}", run.failures().collect::<Vec<_>>());
        for outcome in &run.outcomes {
            let output = outcome.output.as_ref().unwrap();
            assert_eq!(output.predicted.len(), 2);
            assert!(output.predicted.iter().all(|b| b.len() == 128));
            assert_eq!(output.observed.len(), 256);
            assert!(output.predicted_flat().iter().all(|v| v.is_finite()));
        }

        let variant = FilterVariant::new(PropagatorKind::Givens, AssimilatorKind::Potter);
        let series = run.variant_series(variant);
        assert_eq!(series.ground_truth.len(), 256);
        assert_eq!(series.observed_significant.len(), 256);

        // WC observation at tick j is the mean of channels 11..14 of sample j+1
        let target = blocks[0].frame(6);
        let expected = (target[11] + target[12] + target[13]) / 3.0;
        assert_relative_eq!(series.observed_significant[5], expected, epsilon = 1e-9);
        assert_relative_eq!(series.ground_truth[5], target.mean(), epsilon = 1e-9);
    }

    #[test]
    fn test_results_independent_of_worker_count() {
        let blocks = eeg_like_blocks(32, 2);
        let cfg = |workers| EnsembleConfig {
            sampling_rate: 32,
            ..config(workers)
        };
        let serial = EnsembleRunner::new(cfg(1)).unwrap().run("S2", &blocks).unwrap();
        let parallel = EnsembleRunner::new(cfg(6)).unwrap().run("S2", &blocks).unwrap();

        for (a, b) in serial.outcomes.iter().zip(&parallel.outcomes) {
            assert_eq!(a.label, b.label);
            let (oa, ob) = (a.output.as_ref().unwrap(), b.output.as_ref().unwrap());
            assert_eq!(oa.predicted, ob.predicted);
            assert_eq!(oa.observed, ob.observed);
        }
    }

    #[test]
    fn test_failure_is_isolated() {
        let blocks = eeg_like_blocks(32, 2);
        let cfg = EnsembleConfig {
            sampling_rate: 32,
            ..config(3)
        };
        let runner = EnsembleRunner::new(cfg).unwrap();
        let clean = runner.run("S3", &blocks).unwrap();

        let mut plans = runner.plan("S3");
        let poisoned = 4;
        let mut bad = StateMat::identity(14, 14);
        bad[(0, 0)] = f64::NAN;
        plans[poisoned].seed_covariance = Some(bad);
        let run = runner.run_plans("S3", &blocks, plans).unwrap();

        assert!(matches!(run.outcomes[poisoned].status, UnitStatus::Failed { .. }));
        assert!(run.outcomes[poisoned].output.is_none());
        assert_eq!(run.failures().count(), 1);

        for (i, (a, b)) in clean.outcomes.iter().zip(&run.outcomes).enumerate() {
            if i == poisoned {
                continue;
            }
            let (oa, ob) = (a.output.as_ref().unwrap(), b.output.as_ref().unwrap());
            assert_eq!(oa.predicted, ob.predicted);
            assert_eq!(oa.observed, ob.observed);
        }
    }

    #[test]
    fn test_subset_of_plans_on_oversized_pool() {
        let blocks = eeg_like_blocks(32, 2);
        let cfg = EnsembleConfig {
            sampling_rate: 32,
            ..config(8)
        };
        let runner = EnsembleRunner::new(cfg).unwrap();
        let plans: Vec<UnitPlan> = runner.plan("S5").into_iter().skip(25).collect();
        let run = runner.run_plans("S5", &blocks, plans).unwrap();

        assert_eq!(run.outcomes.len(), 2);
        assert_eq!(run.outcomes[0].index, 25);
        assert_eq!(run.outcomes[1].index, 26);
        assert_eq!(run.completed(), 2);
        assert_eq!(run.blocks, 2);
        assert_eq!(run.sampling_rate, 32);
    }

    #[test]
    fn test_partial_block_stream_rejected() {
        let runner = EnsembleRunner::new(config(1)).unwrap();
        let short = vec![SessionBlock::new(0, Array2::zeros((14, 100)))];
        assert!(matches!(
            runner.run("S4", &short),
            Err(EnsembleError::InputValidation(_))
        ));
        assert!(matches!(
            runner.run("S4", &[]),
            Err(EnsembleError::InputValidation(_))
        ));
    }

    #[test]
    fn test_unit_seeds_distinct() {
        let runner = EnsembleRunner::new(config(1)).unwrap();
        let plans = runner.plan("S1");
        let seeds: HashSet<u64> = plans.iter().map(|p| p.seed).collect();
        assert_eq!(seeds.len(), plans.len());
        let again: Vec<u64> = runner.plan("S1").iter().map(|p| p.seed).collect();
        assert_eq!(again, plans.iter().map(|p| p.seed).collect::<Vec<_>>());
    }

    #[test]
    fn test_sanitize_for_handoff() {
        let cleaned = sanitize_for_handoff(&[f64::NAN, f64::INFINITY, -1e300, 2.5]);
        let limit = f64::from(f32::MAX);
        assert_eq!(cleaned, vec![0.0, limit, -limit, 2.5]);
    }
}
