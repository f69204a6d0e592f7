//! Audio capture and spectral analysis

mod bins;
mod capture;
mod fft;
mod filter;
mod fold;
mod ingest;
mod sources;
mod window;

pub use bins::{linear_bins, log_bins, BinMapping, FrequencyAxis, FrequencyBinMapper};
pub use capture::{downmix, normalize, AudioCaptureHandle, CaptureError};
pub use fft::{compress, level_db, to_db, FrameSummary, ProcessedFrame, SpectralAnalyzer};
pub use filter::{anti_alias_lowpass, Biquad, FilterChain, FilterStage};
pub use fold::{combine_folds, fold_cutoff, Decimator, FoldCombine, FoldOutput};
pub use ingest::{FreshSamples, IngestBuffer};
pub use sources::{
    ChunkSource, LiveSource, NoiseColor, NoiseSource, Restart, SineSource, SweepSource,
};
pub use window::AnalysisWindow;

use crate::config::ConfigError;
use serde::Deserialize;

/// One mono PCM sample, normalized to [-1, 1]
pub type Sample = f32;

/// Level floor: 10^(-96/20), keeps every log10 finite
pub const EPS: f64 = 1.584_893_192_461_114e-5;

/// Autocorrelation values at or below this are zeroed in the harmonicity vector
pub const HARMONICITY_THRESHOLD: f64 = 0.4;

/// Audio processing configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz, fixed for the lifetime of the analyzer
    pub sample_rate: u32,

    /// FFT window size (power of two)
    pub window_size: usize,

    /// Lower edge of the analysis band in Hz
    pub f0: f64,

    /// Upper edge of the analysis band in Hz
    pub f1: f64,

    /// Number of log-spaced output bins, usually the display width
    pub resolution: usize,

    /// Number of octave folds (0 disables folding)
    pub num_folds: usize,

    /// Linear to log bin remapping strategy
    pub bin_mapping: BinMapping,

    /// How fold spectra are merged
    pub fold_combine: FoldCombine,

    /// Capacity of the capture ring buffer; defaults to `window_size`
    pub ingest_capacity: Option<usize>,

    /// Input device name; the host default when unset
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            window_size: 65536,
            f0: 40.0,
            f1: 20000.0,
            resolution: 1920,
            num_folds: 0,
            bin_mapping: BinMapping::default(),
            fold_combine: FoldCombine::default(),
            ingest_capacity: None,
            device: None,
        }
    }
}

impl AudioConfig {
    pub const MAX_FOLDS: usize = 8;

    pub fn ingest_capacity(&self) -> usize {
        self.ingest_capacity.unwrap_or(self.window_size)
    }

    /// Reject configurations the analyzer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size < 4 || !self.window_size.is_power_of_two() {
            return Err(ConfigError::InvalidWindowSize(self.window_size));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if !(self.f0 > 0.0 && self.f0 < self.f1 && self.f1 <= nyquist) {
            return Err(ConfigError::InvalidBand {
                f0: self.f0,
                f1: self.f1,
                nyquist,
            });
        }
        if self.resolution < 2 {
            return Err(ConfigError::InvalidResolution(self.resolution));
        }
        if self.num_folds > Self::MAX_FOLDS {
            return Err(ConfigError::TooManyFolds(self.num_folds));
        }
        if self.ingest_capacity() == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AudioConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.ingest_capacity(), 65536);
        assert_eq!(config.bin_mapping, BinMapping::Interpolate);
        assert_eq!(config.fold_combine, FoldCombine::Overwrite);
    }

    #[test]
    fn eps_is_minus_96_db() {
        assert!((20.0 * EPS.log10() + 96.0).abs() < 1e-9);
    }

    #[test]
    fn validate_rejects_non_power_of_two_window() {
        let config = AudioConfig {
            window_size: 48000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWindowSize(48000))
        ));
    }

    #[test]
    fn validate_rejects_inverted_or_out_of_range_band() {
        let inverted = AudioConfig {
            f0: 1000.0,
            f1: 100.0,
            ..Default::default()
        };
        assert!(matches!(inverted.validate(), Err(ConfigError::InvalidBand { .. })));

        let above_nyquist = AudioConfig {
            sample_rate: 16000,
            ..Default::default()
        };
        assert!(matches!(
            above_nyquist.validate(),
            Err(ConfigError::InvalidBand { .. })
        ));
    }

    #[test]
    fn validate_limits_folds_and_resolution() {
        let folds = AudioConfig {
            num_folds: 9,
            ..Default::default()
        };
        assert!(matches!(folds.validate(), Err(ConfigError::TooManyFolds(9))));

        let resolution = AudioConfig {
            resolution: 1,
            ..Default::default()
        };
        assert!(matches!(
            resolution.validate(),
            Err(ConfigError::InvalidResolution(1))
        ));

        let capacity = AudioConfig {
            ingest_capacity: Some(0),
            ..Default::default()
        };
        assert!(matches!(capacity.validate(), Err(ConfigError::InvalidCapacity)));
    }
}
