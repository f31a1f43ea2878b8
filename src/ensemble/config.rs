use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ensemble::bank::{SensorBank, SensorPartition};
use crate::error::{EnsembleError, EnsembleResult};
use crate::filters::FilterVariant;
use crate::types::{CHANNEL_COUNT, DEFAULT_SAMPLING_RATE, EPSILON};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    // ── Recording layout ──
    /// Samples per block; also the Δt divisor
    pub sampling_rate: usize,
    pub channel_count: usize,
    /// 1 = significant channel
    pub significance_mask: Vec<u8>,

    // ── Filter tuning ──
    /// Q = process_noise · I
    pub process_noise: f64,
    /// Floor for LDL / U-D diagonal entries
    pub epsilon: f64,

    // ── Ensemble selection ──
    /// Variant labels, e.g. "Potter_Givens"
    pub variants: Vec<String>,
    pub banks: Vec<SensorBank>,

    // ── Execution ──
    /// Base seed; every unit derives its own generator from it
    pub seed: u64,
    pub workers: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            sampling_rate: DEFAULT_SAMPLING_RATE,
            channel_count: CHANNEL_COUNT,
            significance_mask: SensorPartition::trailing_mask(CHANNEL_COUNT, 3),
            process_noise: 1.0,
            epsilon: EPSILON,
            variants: FilterVariant::all().iter().map(FilterVariant::label).collect(),
            banks: SensorBank::ALL.to_vec(),
            seed: 42,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl EnsembleConfig {
    pub fn from_json_path(path: &Path) -> EnsembleResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Reject anything that cannot produce a valid unit, before data is read.
    pub fn validate(&self) -> EnsembleResult<()> {
        if self.sampling_rate == 0 {
            return Err(EnsembleError::config("Sampling rate must be positive"));
        }
        if self.channel_count == 0 {
            return Err(EnsembleError::config("Channel count must be positive"));
        }
        if !(self.process_noise >= 0.0 && self.process_noise.is_finite()) {
            return Err(EnsembleError::config(format!(
                "Process noise must be a finite non-negative scale, got {}",
                self.process_noise
            )));
        }
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(EnsembleError::config(format!(
                "Epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if self.banks.is_empty() {
            return Err(EnsembleError::config("No sensor banks selected"));
        }
        if self.workers == 0 {
            return Err(EnsembleError::config("Worker count must be at least 1"));
        }
        self.partition()?;
        self.resolved_variants()?;
        Ok(())
    }

    pub fn partition(&self) -> EnsembleResult<SensorPartition> {
        SensorPartition::new(&self.significance_mask, self.channel_count)
    }

    /// Parse variant labels once; duplicates collapse to the first occurrence.
    pub fn resolved_variants(&self) -> EnsembleResult<Vec<FilterVariant>> {
        if self.variants.is_empty() {
            return Err(EnsembleError::config("No filter variants selected"));
        }
        let mut resolved: Vec<FilterVariant> = Vec::with_capacity(self.variants.len());
        for name in &self.variants {
            let variant: FilterVariant = name.parse()?;
            if !resolved.contains(&variant) {
                resolved.push(variant);
            }
        }
        Ok(resolved)
    }

    pub fn with_mask(mut self, mask: Vec<u8>) -> Self {
        self.significance_mask = mask;
        self
    }
}

/// Parse `"0,0,1,1"` (or whitespace separated) into a mask.
pub fn parse_mask(text: &str) -> EnsembleResult<Vec<u8>> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<u8>()
                .map_err(|_| EnsembleError::config(format!("Mask entry '{}' is not 0 or 1", t)))
        })
        .collect()
}
