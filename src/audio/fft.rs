//! Spectral analysis: levels, log-binned spectrum and harmonicity per cycle

use super::bins::{linear_bins, FrequencyAxis, FrequencyBinMapper};
use super::capture::normalize;
use super::filter::FilterStage;
use super::fold::{combine_folds, fold_cutoff, Decimator, FoldOutput};
use super::window::AnalysisWindow;
use super::{AudioConfig, Sample, EPS, HARMONICITY_THRESHOLD};
use crate::config::ConfigError;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

/// Level in dB relative to full scale, floored at -96 dB.
pub fn to_db(value: f64) -> f64 {
    20.0 * (value + EPS).log10()
}

/// `(rms_db, peak_db)` of a chunk. An empty chunk reads as the floor.
pub fn level_db(chunk: &[Sample]) -> (f64, f64) {
    if chunk.is_empty() {
        return (to_db(0.0), to_db(0.0));
    }
    let (sum_sq, peak) = chunk.iter().fold((0.0f64, 0.0f64), |(sum, peak), &s| {
        let x = s as f64;
        (sum + x * x, peak.max(x.abs()))
    });
    let rms = (sum_sq / chunk.len() as f64).sqrt();
    (to_db(rms), to_db(peak))
}

/// Log compression onto roughly [0, 1] for display: `log2(1 + 100x) / log2(101)`
pub fn compress(x: f64) -> f64 {
    (1.0 + 100.0 * x).log2() / 101f64.log2()
}

/// Result of one analysis cycle. Immutable once published.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFrame {
    /// RMS level of the cycle's raw chunk, dBFS
    pub rms_db: f64,
    /// Peak level of the cycle's raw chunk, dBFS
    pub peak_db: f64,
    /// Log-compressed magnitude per log bin
    pub spectrum: Vec<f64>,
    /// Harmonic-spacing strength per log bin, in [0, 1]
    pub harmonicity: Vec<f64>,
}

impl ProcessedFrame {
    /// The frame published before any audio has been analysed.
    pub fn silent(resolution: usize) -> Self {
        Self {
            rms_db: to_db(0.0),
            peak_db: to_db(0.0),
            spectrum: vec![compress(EPS); resolution],
            harmonicity: vec![0.0; resolution],
        }
    }

    /// Condense the frame into a one-line debugging summary.
    pub fn summarize(&self, log_bins: &[f64]) -> FrameSummary {
        let (min, max, sum) = self.spectrum.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), &v| (min.min(v), max.max(v), sum + v),
        );
        let mean = if self.spectrum.is_empty() {
            0.0
        } else {
            sum / self.spectrum.len() as f64
        };

        let mut peaks: Vec<(f64, usize)> = (1..self.spectrum.len().saturating_sub(1))
            .filter(|&i| {
                self.spectrum[i] > self.spectrum[i - 1] && self.spectrum[i] >= self.spectrum[i + 1]
            })
            .map(|i| (prominence(&self.spectrum, i), i))
            .collect();
        peaks.sort_by(|a, b| b.0.total_cmp(&a.0));

        FrameSummary {
            rms_db: self.rms_db,
            peak_db: self.peak_db,
            mean,
            min: if min.is_finite() { min } else { 0.0 },
            max: if max.is_finite() { max } else { 0.0 },
            peaks: peaks
                .into_iter()
                .take(2)
                .filter_map(|(_, i)| log_bins.get(i).copied())
                .collect(),
        }
    }
}

/// Height of a local maximum above the higher of the lowest points on
/// either side before the signal climbs above it again.
fn prominence(values: &[f64], peak: usize) -> f64 {
    let height = values[peak];
    let left = lowest_below(values[..peak].iter().rev(), height);
    let right = lowest_below(values[peak + 1..].iter(), height);
    height - left.max(right)
}

fn lowest_below<'a>(side: impl Iterator<Item = &'a f64>, height: f64) -> f64 {
    side.take_while(|&&v| v <= height)
        .fold(height, |lowest, &v| lowest.min(v))
}

/// Printable digest of a [`ProcessedFrame`]
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub rms_db: f64,
    pub peak_db: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Frequencies of the most prominent spectral peaks, strongest first
    pub peaks: Vec<f64>,
}

impl fmt::Display for FrameSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rms {:.1} dB, peak {:.1} dB | spectrum mean {:.3} min {:.3} max {:.3} | peaks:",
            self.rms_db, self.peak_db, self.mean, self.min, self.max
        )?;
        if self.peaks.is_empty() {
            return write!(f, " none");
        }
        for (i, freq) in self.peaks.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{:.1} Hz", sep, freq)?;
        }
        Ok(())
    }
}

/// One analysis path: fold 0 at the input rate, fold `k` at `rate / 2^k`.
struct AnalysisPath {
    sample_rate: f64,
    window: AnalysisWindow,
    filter: FilterStage,
    /// Produces this path's samples from the previous path's; None for fold 0
    decimator: Option<Decimator>,
    mapper: FrequencyBinMapper,
}

impl AnalysisPath {
    fn new(config: &AudioConfig, level: usize, log_bins: &[f64]) -> Self {
        let sample_rate = config.sample_rate as f64 / 2f64.powi(level as i32);
        let linear = linear_bins(config.window_size, sample_rate);
        Self {
            sample_rate,
            window: AnalysisWindow::new(config.window_size),
            filter: FilterStage::new(config.f0, config.f1, sample_rate),
            decimator: (level > 0).then(|| Decimator::new(sample_rate * 2.0)),
            mapper: FrequencyBinMapper::new(&linear, log_bins, config.bin_mapping),
        }
    }
}

/// FFT plans and scratch space shared by every path (all run at the same W).
struct Transform {
    window_fn: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
    acf_forward: Arc<dyn Fft<f64>>,
    acf_inverse: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex<f64>>,
    frame: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    acf: Vec<Complex<f64>>,
    magnitudes: Vec<f64>,
    harmonicity: Vec<f64>,
}

impl Transform {
    fn new(window_size: usize) -> Self {
        let bins = window_size / 2 + 1;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);
        let acf_forward = planner.plan_fft_forward(bins);
        let acf_inverse = planner.plan_fft_inverse(bins);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(acf_forward.get_inplace_scratch_len())
            .max(acf_inverse.get_inplace_scratch_len());

        // Symmetric Hann window
        let window_fn = (0..window_size)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f64::consts::PI * i as f64 / (window_size - 1) as f64).cos())
            })
            .collect();

        Self {
            window_fn,
            fft,
            acf_forward,
            acf_inverse,
            scratch: vec![Complex::default(); scratch_len],
            frame: vec![0.0; window_size],
            spectrum: vec![Complex::default(); window_size],
            acf: vec![Complex::default(); bins],
            magnitudes: vec![0.0; bins],
            harmonicity: vec![0.0; bins],
        }
    }

    /// Window, band-limit and transform one path, then map onto the log axis.
    fn run(&mut self, path: &AnalysisPath, out: &mut FoldOutput) {
        path.window.materialize_into(&mut self.frame);
        for (x, w) in self.frame.iter_mut().zip(&self.window_fn) {
            *x *= w;
        }
        path.filter.apply(&mut self.frame);

        for (c, &x) in self.spectrum.iter_mut().zip(&self.frame) {
            *c = Complex::new(x, 0.0);
        }
        self.fft.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        // Unclipped here; the log bins are clipped after mapping
        let norm = 1.0 / self.frame.len() as f64;
        for (m, c) in self.magnitudes.iter_mut().zip(&self.spectrum) {
            *m = c.norm() * norm;
        }
        self.autocorrelate();

        path.mapper.map_into(&self.magnitudes, &mut out.spectrum);
        for v in out.spectrum.iter_mut() {
            *v = compress(v.clamp(EPS, 1.0 / EPS));
        }
        path.mapper.map_into(&self.harmonicity, &mut out.harmonicity);
        for v in out.harmonicity.iter_mut() {
            *v = v.clamp(0.0, 1.0);
        }
    }

    /// Autocorrelation of the mean-removed compressed spectrum, normalized
    /// to lag 0. Lag `l` lands on linear bin `l`, i.e. a harmonic spacing of
    /// `l * fs / W` Hz.
    fn autocorrelate(&mut self) {
        let n = self.magnitudes.len();
        self.harmonicity.fill(0.0);

        let level = |m: f64| compress(m.clamp(EPS, 1.0 / EPS));
        let mean = self.magnitudes.iter().map(|&m| level(m)).sum::<f64>() / n as f64;
        for (c, &m) in self.acf.iter_mut().zip(&self.magnitudes) {
            *c = Complex::new(level(m) - mean, 0.0);
        }
        let energy: f64 = self.acf.iter().map(|c| c.re * c.re).sum();
        if energy <= f64::EPSILON {
            // Flat spectrum: nothing repeats
            return;
        }

        self.acf_forward
            .process_with_scratch(&mut self.acf, &mut self.scratch);
        for c in self.acf.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        self.acf_inverse
            .process_with_scratch(&mut self.acf, &mut self.scratch);

        let zero_lag = self.acf[0].re;
        if zero_lag <= 0.0 {
            return;
        }
        for (h, c) in self.harmonicity.iter_mut().zip(&self.acf).take(n / 2 + 1) {
            *h = harmonic_strength(c.re / zero_lag);
        }
    }
}

/// Normalized autocorrelation clipped to [0, 1], zero unless it exceeds the
/// threshold.
fn harmonic_strength(r: f64) -> f64 {
    let r = r.clamp(0.0, 1.0);
    if r <= HARMONICITY_THRESHOLD {
        0.0
    } else {
        r
    }
}

/// Turns chunks of mono samples into [`ProcessedFrame`]s.
///
/// Holds the rolling window (one per fold), the band-pass, the FFT plans and
/// the bin mappers. Everything is sized at construction; a cycle allocates
/// only the published frame.
pub struct SpectralAnalyzer {
    config: AudioConfig,
    axis: FrequencyAxis,
    paths: Vec<AnalysisPath>,
    cutoffs: Vec<f64>,
    transform: Transform,
    fold_outputs: Vec<FoldOutput>,
    input: Vec<f64>,
    decimated: Vec<f64>,
    last_frame: Arc<ProcessedFrame>,
    frames: u64,
    skipped: u64,
}

impl SpectralAnalyzer {
    pub fn new(config: AudioConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let sample_rate = config.sample_rate as f64;
        let axis = FrequencyAxis::new(
            config.window_size,
            sample_rate,
            config.f0,
            config.f1,
            config.resolution,
        );
        let paths: Vec<AnalysisPath> = (0..=config.num_folds)
            .map(|level| AnalysisPath::new(&config, level, axis.log_bins()))
            .collect();
        let cutoffs = (0..=config.num_folds)
            .map(|level| fold_cutoff(sample_rate, level))
            .collect();

        log::info!(
            "Spectral analyzer: {} Hz, window {} ({:.3} Hz/bin), band {}-{} Hz, {} log bins, {} folds",
            config.sample_rate,
            config.window_size,
            axis.resolution(),
            config.f0,
            config.f1,
            config.resolution,
            config.num_folds
        );
        for (level, path) in paths.iter().enumerate().skip(1) {
            log::debug!(
                "Fold {}: {} Hz, {:.4} Hz/bin",
                level,
                path.sample_rate,
                path.sample_rate / config.window_size as f64
            );
        }

        Ok(Self {
            transform: Transform::new(config.window_size),
            fold_outputs: vec![FoldOutput::new(config.resolution); paths.len()],
            last_frame: Arc::new(ProcessedFrame::silent(config.resolution)),
            input: Vec::new(),
            decimated: Vec::new(),
            frames: 0,
            skipped: 0,
            config,
            axis,
            paths,
            cutoffs,
        })
    }

    /// Run one analysis cycle on a chunk of mono samples.
    ///
    /// An empty chunk or one containing NaN/Inf skips the cycle and returns
    /// the previous frame.
    pub fn process(&mut self, chunk: &[Sample]) -> Arc<ProcessedFrame> {
        if chunk.is_empty() {
            self.skip("empty chunk");
            return self.last_frame.clone();
        }
        if chunk.iter().any(|s| !s.is_finite()) {
            self.skip("non-finite samples");
            return self.last_frame.clone();
        }

        let (rms_db, peak_db) = level_db(chunk);

        self.input.clear();
        self.input.extend(chunk.iter().map(|&s| s as f64));
        for path in &mut self.paths {
            if let Some(decimator) = path.decimator.as_mut() {
                decimator.process(&self.input, &mut self.decimated);
                std::mem::swap(&mut self.input, &mut self.decimated);
            }
            path.window.push(&self.input);
        }

        for (path, out) in self.paths.iter().zip(self.fold_outputs.iter_mut()) {
            self.transform.run(path, out);
        }

        let mut merged = FoldOutput::new(self.config.resolution);
        combine_folds(
            self.config.fold_combine,
            self.axis.log_bins(),
            &self.fold_outputs,
            &self.cutoffs,
            &mut merged,
        );

        self.frames += 1;
        self.last_frame = Arc::new(ProcessedFrame {
            rms_db,
            peak_db,
            spectrum: merged.spectrum,
            harmonicity: merged.harmonicity,
        });
        self.last_frame.clone()
    }

    /// Normalize integer or float PCM once, then [`process`](Self::process).
    pub fn process_raw<T>(&mut self, chunk: &[T]) -> Arc<ProcessedFrame>
    where
        T: cpal::Sample,
        f32: cpal::FromSample<T>,
    {
        let samples = normalize(chunk);
        self.process(&samples)
    }

    fn skip(&mut self, reason: &str) {
        self.skipped += 1;
        log::debug!("Skipping analysis cycle ({}), {} skipped so far", reason, self.skipped);
    }

    pub fn last_frame(&self) -> Arc<ProcessedFrame> {
        self.last_frame.clone()
    }

    /// Center frequencies of the output bins
    pub fn log_bins(&self) -> &[f64] {
        self.axis.log_bins()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    pub fn skipped_cycles(&self) -> u64 {
        self.skipped
    }
}
