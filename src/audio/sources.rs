//! Pull-based chunk sources feeding the analyzer

use super::ingest::IngestBuffer;
use super::Sample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::sync::Arc;

/// A stream of mono sample chunks at a fixed rate.
///
/// `None` means the source is exhausted; an empty chunk means no new
/// samples yet.
pub trait ChunkSource: Iterator<Item = Vec<Sample>> {
    fn sample_rate(&self) -> u32;
}

/// Sources that can replay from their first sample.
pub trait Restart {
    fn restart(&mut self);
}

/// Fixed-frequency sine, optionally limited to a total sample count.
#[derive(Debug, Clone)]
pub struct SineSource {
    frequency: f64,
    amplitude: f64,
    sample_rate: u32,
    chunk_size: usize,
    limit: Option<usize>,
    position: usize,
}

impl SineSource {
    pub fn new(frequency: f64, sample_rate: u32, chunk_size: usize) -> Self {
        Self {
            frequency,
            amplitude: 1.0,
            sample_rate,
            chunk_size: chunk_size.max(1),
            limit: None,
            position: 0,
        }
    }

    pub fn amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Stop after `total` samples
    pub fn limit(mut self, total: usize) -> Self {
        self.limit = Some(total);
        self
    }
}

impl Iterator for SineSource {
    type Item = Vec<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.limit.map_or(usize::MAX, |l| l.saturating_sub(self.position));
        let len = self.chunk_size.min(remaining);
        if len == 0 {
            return None;
        }

        let step = TAU * self.frequency / self.sample_rate as f64;
        let chunk = (self.position..self.position + len)
            .map(|n| (self.amplitude * (step * n as f64).sin()) as Sample)
            .collect();
        self.position += len;
        Some(chunk)
    }
}

impl ChunkSource for SineSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Restart for SineSource {
    fn restart(&mut self) {
        self.position = 0;
    }
}

/// Exponential sine sweep from `start_hz` to `end_hz` over a fixed number
/// of samples, then exhausted.
#[derive(Debug, Clone)]
pub struct SweepSource {
    start_hz: f64,
    end_hz: f64,
    length: usize,
    amplitude: f64,
    sample_rate: u32,
    chunk_size: usize,
    position: usize,
    phase: f64,
}

impl SweepSource {
    pub fn new(
        start_hz: f64,
        end_hz: f64,
        seconds: f64,
        sample_rate: u32,
        chunk_size: usize,
    ) -> Self {
        Self {
            start_hz,
            end_hz,
            length: (seconds * sample_rate as f64).round().max(0.0) as usize,
            amplitude: 1.0,
            sample_rate,
            chunk_size: chunk_size.max(1),
            position: 0,
            phase: 0.0,
        }
    }

    pub fn amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Instantaneous frequency at sample `n`
    pub fn frequency_at(&self, n: usize) -> f64 {
        let progress = if self.length > 1 {
            n.min(self.length - 1) as f64 / (self.length - 1) as f64
        } else {
            0.0
        };
        self.start_hz * (self.end_hz / self.start_hz).powf(progress)
    }

    /// Total sweep length in samples
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl Iterator for SweepSource {
    type Item = Vec<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.chunk_size.min(self.length - self.position);
        if len == 0 {
            return None;
        }

        let fs = self.sample_rate as f64;
        let mut chunk = Vec::with_capacity(len);
        for n in self.position..self.position + len {
            chunk.push((self.amplitude * self.phase.sin()) as Sample);
            self.phase = (self.phase + TAU * self.frequency_at(n) / fs) % TAU;
        }
        self.position += len;
        Some(chunk)
    }
}

impl ChunkSource for SweepSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Restart for SweepSource {
    fn restart(&mut self) {
        self.position = 0;
        self.phase = 0.0;
    }
}

/// Spectral tilt of a [`NoiseSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseColor {
    White,
    /// -3 dB per octave
    Pink,
}

/// Third-order IIR approximating a 1/f power slope
#[derive(Debug, Clone, Default)]
struct PinkFilter {
    x: [f64; 4],
    y: [f64; 3],
}

impl PinkFilter {
    const B: [f64; 4] = [0.049922035, -0.095993537, 0.050612699, -0.004408786];
    const A: [f64; 3] = [-2.494956002, 2.017265875, -0.5221894];

    fn tick(&mut self, input: f64) -> f64 {
        self.x = [input, self.x[0], self.x[1], self.x[2]];
        let feed_forward: f64 = Self::B.iter().zip(&self.x).map(|(b, x)| b * x).sum();
        let feedback: f64 = Self::A.iter().zip(&self.y).map(|(a, y)| a * y).sum();
        let out = feed_forward - feedback;
        self.y = [out, self.y[0], self.y[1]];
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ToneBurst {
    frequency: f64,
    amplitude: f64,
    start: usize,
    end: usize,
}

/// Seeded Gaussian noise, white or pink, with an optional level sweep and
/// sine bursts on top. A given seed always yields the same samples.
#[derive(Debug, Clone)]
pub struct NoiseSource {
    color: NoiseColor,
    sigma: f64,
    seed: u64,
    rng: StdRng,
    pink: PinkFilter,
    /// Gain in dB at the first and last sample of `limit`
    sweep: Option<(f64, f64)>,
    bursts: Vec<ToneBurst>,
    sample_rate: u32,
    chunk_size: usize,
    limit: Option<usize>,
    position: usize,
}

impl NoiseSource {
    /// Noise whose white driver has standard deviation `sigma`.
    pub fn new(color: NoiseColor, sigma: f64, sample_rate: u32, chunk_size: usize) -> Self {
        Self {
            color,
            sigma,
            seed: 0,
            rng: StdRng::seed_from_u64(0),
            pink: PinkFilter::default(),
            sweep: None,
            bursts: Vec::new(),
            sample_rate,
            chunk_size: chunk_size.max(1),
            limit: None,
            position: 0,
        }
    }

    /// Pink noise swept from -90 dB to +12 dB over `seconds`, with half-scale
    /// 440 Hz and 880 Hz bursts of two seconds each, the second starting
    /// halfway through.
    pub fn test_signal(seconds: f64, sample_rate: u32, chunk_size: usize) -> Self {
        let total = (seconds * sample_rate as f64).round().max(0.0) as usize;
        Self::new(NoiseColor::Pink, 1.0, sample_rate, chunk_size)
            .level_sweep(-90.0, 12.0, total)
            .tone_burst(440.0, 0.5, 0.0, 2.0)
            .tone_burst(880.0, 0.5, seconds / 2.0, 2.0)
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Stop after `total` samples
    pub fn limit(mut self, total: usize) -> Self {
        self.limit = Some(total);
        self
    }

    /// Ramp the noise gain linearly in dB across `total` samples, then stop.
    pub fn level_sweep(mut self, start_db: f64, end_db: f64, total: usize) -> Self {
        self.sweep = Some((start_db, end_db));
        self.limit = Some(total);
        self
    }

    /// Add a sine of `amplitude` from `start` for `duration` seconds.
    pub fn tone_burst(mut self, frequency: f64, amplitude: f64, start: f64, duration: f64) -> Self {
        let fs = self.sample_rate as f64;
        let start = (start * fs).round().max(0.0) as usize;
        self.bursts.push(ToneBurst {
            frequency,
            amplitude,
            start,
            end: start + (duration * fs).round().max(0.0) as usize,
        });
        self
    }

    /// Noise gain in dB at sample `n`
    pub fn gain_db_at(&self, n: usize) -> f64 {
        match (self.sweep, self.limit) {
            (Some((start, end)), Some(total)) if total > 1 => {
                start + (end - start) * n.min(total - 1) as f64 / (total - 1) as f64
            }
            (Some((start, _)), _) => start,
            (None, _) => 0.0,
        }
    }

    /// Standard normal sample via Box-Muller
    fn gaussian(&mut self) -> f64 {
        let u1 = 1.0 - self.rng.random::<f64>();
        let u2: f64 = self.rng.random();
        (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
    }
}

impl Iterator for NoiseSource {
    type Item = Vec<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.limit.map_or(usize::MAX, |l| l.saturating_sub(self.position));
        let len = self.chunk_size.min(remaining);
        if len == 0 {
            return None;
        }

        let fs = self.sample_rate as f64;
        let mut chunk = Vec::with_capacity(len);
        for n in self.position..self.position + len {
            let white = self.sigma * self.gaussian();
            let noise = match self.color {
                NoiseColor::White => white,
                NoiseColor::Pink => self.pink.tick(white),
            };
            let gain = 10f64.powf(self.gain_db_at(n) / 20.0);
            let tones: f64 = self
                .bursts
                .iter()
                .filter(|burst| (burst.start..burst.end).contains(&n))
                .map(|burst| burst.amplitude * (TAU * burst.frequency * n as f64 / fs).sin())
                .sum();
            chunk.push((noise * gain + tones) as Sample);
        }
        self.position += len;
        Some(chunk)
    }
}

impl ChunkSource for NoiseSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Restart for NoiseSource {
    fn restart(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.pink = PinkFilter::default();
        self.position = 0;
    }
}

/// Reads whatever the capture thread wrote since the previous chunk.
///
/// Never exhausted. Samples overwritten before they were read are counted
/// in [`LiveSource::dropped`].
pub struct LiveSource {
    ingest: Arc<IngestBuffer>,
    sample_rate: u32,
    cursor: u64,
    dropped: u64,
}

impl LiveSource {
    /// Start reading from the buffer's current position.
    pub fn new(ingest: Arc<IngestBuffer>, sample_rate: u32) -> Self {
        let cursor = ingest.total_written();
        Self {
            ingest,
            sample_rate,
            cursor,
            dropped: 0,
        }
    }

    /// Total samples lost to ingest overruns
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Iterator for LiveSource {
    type Item = Vec<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        let fresh = self.ingest.read_since(self.cursor);
        if fresh.dropped > 0 {
            self.dropped += fresh.dropped;
            log::debug!(
                "Ingest overrun: {} samples dropped ({} total)",
                fresh.dropped,
                self.dropped
            );
        }
        self.cursor = fresh.cursor;
        Some(fresh.samples)
    }
}

impl ChunkSource for LiveSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
