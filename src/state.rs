//! Application state: the analyzer, its input and the latest frame

use crate::audio::{
    AudioCaptureHandle, CaptureError, ChunkSource, ProcessedFrame, SpectralAnalyzer,
};
use crate::config::{Config, ConfigError, DisplayConfig};
use std::sync::Arc;
use thiserror::Error;

/// Errors while bringing up an [`AppState`]
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Source runs at {source_rate} Hz but the analyzer expects {configured} Hz")]
    SampleRateMismatch { source_rate: u32, configured: u32 },
}

/// Application state
pub struct AppState {
    /// Display settings for whoever draws the frames
    pub display: DisplayConfig,

    /// Running capture, when the source is live audio
    capture: Option<AudioCaptureHandle>,

    analyzer: SpectralAnalyzer,
    source: Box<dyn ChunkSource + Send>,

    /// Most recent frame, published once per tick
    latest: Arc<ProcessedFrame>,
}

impl AppState {
    /// Open the configured input device and analyse what it captures.
    pub fn from_capture(config: &Config) -> Result<Self, StartupError> {
        config.validate()?;
        let capture = AudioCaptureHandle::new(&config.audio)?;
        log::info!("Capturing from {}", capture.device_name());

        let mut state = Self::with_source(config, Box::new(capture.source()))?;
        state.capture = Some(capture);
        Ok(state)
    }

    /// Analyse chunks pulled from `source`.
    pub fn with_source(
        config: &Config,
        source: Box<dyn ChunkSource + Send>,
    ) -> Result<Self, StartupError> {
        config.display.validate()?;
        if source.sample_rate() != config.audio.sample_rate {
            return Err(StartupError::SampleRateMismatch {
                source_rate: source.sample_rate(),
                configured: config.audio.sample_rate,
            });
        }

        let analyzer = SpectralAnalyzer::new(config.audio.clone())?;
        Ok(Self {
            display: config.display.clone(),
            capture: None,
            latest: analyzer.last_frame(),
            analyzer,
            source,
        })
    }

    /// Pull one chunk and analyse it. An exhausted source keeps the last frame.
    pub fn tick(&mut self) -> Arc<ProcessedFrame> {
        if let Some(chunk) = self.source.next() {
            self.latest = self.analyzer.process(&chunk);
        }
        self.latest.clone()
    }

    pub fn latest(&self) -> Arc<ProcessedFrame> {
        self.latest.clone()
    }

    /// Center frequencies of the frame bins
    pub fn log_bins(&self) -> &[f64] {
        self.analyzer.log_bins()
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Stop live capture, if any. Later ticks see no new samples.
    pub fn stop(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
    }
}
