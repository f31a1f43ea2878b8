use flate2::read::GzDecoder;
use ndarray::{s, Array2};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{EnsembleError, EnsembleResult};
use crate::types::SessionBlock;

/// Multichannel recording, stored channel × time.
#[derive(Clone, Debug)]
pub struct Recording {
    data: Array2<f64>,
}

impl Recording {
    pub fn from_array(data: Array2<f64>) -> Self {
        Self { data }
    }

    /// Open a CSV (optionally `.gz`) table. The first row is a header and is
    /// discarded. Rows carry either `channels` values or a leading index
    /// column followed by `channels` values.
    pub fn from_path(path: &Path, channels: usize) -> EnsembleResult<Self> {
        let file = File::open(path)?;
        let gzipped = path.extension().is_some_and(|ext| ext == "gz");
        if gzipped {
            Self::from_reader(GzDecoder::new(BufReader::new(file)), channels)
        } else {
            Self::from_reader(BufReader::new(file), channels)
        }
    }

    pub fn from_reader<R: Read>(reader: R, channels: usize) -> EnsembleResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut values: Vec<f64> = Vec::new();
        let mut rows = 0usize;
        let mut skip_leading = None;

        for (row, record) in csv_reader.records().enumerate() {
            let record = record?;
            // data rows start at line 2
            let line = row + 2;
            let width = record.len();
            let skip = match skip_leading {
                Some(skip) => {
                    if width != channels + skip {
                        return Err(EnsembleError::input(format!(
                            "Line {} has {} columns, expected {}",
                            line,
                            width,
                            channels + skip
                        )));
                    }
                    skip
                }
                None => {
                    let skip = if width == channels {
                        0
                    } else if width == channels + 1 {
                        1
                    } else {
                        return Err(EnsembleError::input(format!(
                            "Line {} has {} columns, expected {} or {}",
                            line,
                            width,
                            channels,
                            channels + 1
                        )));
                    };
                    skip_leading = Some(skip);
                    skip
                }
            };

            for (col, field) in record.iter().enumerate().skip(skip) {
                let value = field.parse::<f64>().ok().filter(|v| v.is_finite());
                let value = value.ok_or_else(|| {
                    EnsembleError::input(format!(
                        "Line {}, column {}: '{}' is not a finite number",
                        line,
                        col + 1,
                        field
                    ))
                })?;
                values.push(value);
            }
            rows += 1;
        }

        if rows == 0 {
            return Err(EnsembleError::input("Recording has no data rows"));
        }

        let time_major = Array2::from_shape_vec((rows, channels), values)
            .map_err(|e| EnsembleError::input(format!("Recording shape: {}", e)))?;
        log::debug!("Loaded recording: {} samples x {} channels", rows, channels);
        Ok(Self {
            data: time_major.reversed_axes().as_standard_layout().to_owned(),
        })
    }

    pub fn channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Split into complete blocks of `sampling_rate` samples; a trailing
    /// partial block is dropped.
    pub fn blocks(&self, sampling_rate: usize) -> EnsembleResult<Vec<SessionBlock>> {
        if sampling_rate == 0 {
            return Err(EnsembleError::config("Sampling rate must be positive"));
        }
        let count = self.samples() / sampling_rate;
        if count == 0 {
            return Err(EnsembleError::input(format!(
                "Recording has {} samples, fewer than one block of {}",
                self.samples(),
                sampling_rate
            )));
        }
        let dropped = self.samples() - count * sampling_rate;
        if dropped > 0 {
            log::warn!("Dropping {} trailing samples that do not fill a block", dropped);
        }
        Ok((0..count)
            .map(|i| {
                let start = i * sampling_rate;
                let samples = self.data.slice(s![.., start..start + sampling_rate]).to_owned();
                SessionBlock::new(i, samples)
            })
            .collect())
    }
}
