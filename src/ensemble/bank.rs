use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EnsembleError, EnsembleResult};
use crate::model::with_diagonal;
use crate::types::{ObservationMat, TransitionMat};

/// Sensor bank analysed as its own estimation problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorBank {
    /// Every channel observed, transition untouched
    All,
    /// Channels marked 1 in the significance mask ("WC")
    Significant,
    /// Channels marked 0 in the significance mask ("NWC")
    NonSignificant,
}

impl SensorBank {
    pub const ALL: [SensorBank; 3] = [
        SensorBank::All,
        SensorBank::Significant,
        SensorBank::NonSignificant,
    ];

    /// Suffix used in exported file names.
    pub fn label(&self) -> &'static str {
        match self {
            SensorBank::All => "All",
            SensorBank::Significant => "WC",
            SensorBank::NonSignificant => "NWC",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            SensorBank::All => 0,
            SensorBank::Significant => 1,
            SensorBank::NonSignificant => 2,
        }
    }
}

impl fmt::Display for SensorBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Validated binary significance mask.
///
/// The one caller-supplied partition drives both the observation matrices
/// and the diagonal substitution of the transition matrix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorPartition {
    mask: Vec<u8>,
}

impl SensorPartition {
    pub fn new(mask: &[u8], channels: usize) -> EnsembleResult<Self> {
        if mask.len() != channels {
            return Err(EnsembleError::input(format!(
                "Significance mask has {} entries, expected {}",
                mask.len(),
                channels
            )));
        }
        if let Some(pos) = mask.iter().position(|&m| m > 1) {
            return Err(EnsembleError::config(format!(
                "Significance mask entry {} is {}, expected 0 or 1",
                pos, mask[pos]
            )));
        }
        let significant = mask.iter().filter(|&&m| m == 1).count();
        if significant == 0 || significant == channels {
            return Err(EnsembleError::config(
                "Significance mask must mark at least one significant and one non-significant channel",
            ));
        }
        Ok(Self {
            mask: mask.to_vec(),
        })
    }

    /// Mask with the last `count` channels significant, the rest not.
    pub fn trailing_mask(channels: usize, count: usize) -> Vec<u8> {
        (0..channels)
            .map(|i| u8::from(i + count >= channels))
            .collect()
    }

    pub fn channels(&self) -> usize {
        self.mask.len()
    }

    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    pub fn significant_channels(&self) -> Vec<usize> {
        self.channels_where(1)
    }

    pub fn non_significant_channels(&self) -> Vec<usize> {
        self.channels_where(0)
    }

    fn channels_where(&self, flag: u8) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter(|&(_, &m)| m == flag)
            .map(|(i, _)| i)
            .collect()
    }

    /// Channels a bank observes, in ascending order.
    pub fn observed_channels(&self, bank: SensorBank) -> Vec<usize> {
        match bank {
            SensorBank::All => (0..self.channels()).collect(),
            SensorBank::Significant => self.significant_channels(),
            SensorBank::NonSignificant => self.non_significant_channels(),
        }
    }

    /// Selection matrix: identity for `All`, one unit row per observed channel otherwise.
    pub fn observation_matrix(&self, bank: SensorBank) -> ObservationMat {
        let rows = self.observed_channels(bank);
        let mut h = ObservationMat::zeros(rows.len(), self.channels());
        for (row, &channel) in rows.iter().enumerate() {
            h[(row, channel)] = 1.0;
        }
        h
    }

    /// Diagonal written into F for the bank, `None` when F is used as built.
    pub fn transition_diagonal(&self, bank: SensorBank) -> Option<Vec<f64>> {
        match bank {
            SensorBank::All => None,
            SensorBank::Significant => Some(self.mask.iter().map(|&m| f64::from(m)).collect()),
            SensorBank::NonSignificant => {
                Some(self.mask.iter().map(|&m| f64::from(1 - m)).collect())
            }
        }
    }

    /// Fresh per-bank transition matrix derived from the shared Taylor matrix.
    pub fn bank_transition(&self, bank: SensorBank, base: &TransitionMat) -> TransitionMat {
        match self.transition_diagonal(bank) {
            Some(diagonal) => with_diagonal(base, &diagonal),
            None => base.clone(),
        }
    }
}
