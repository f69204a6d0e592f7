//! Butterworth filters built from second-order sections
//!
//! Two ways of running a [`FilterChain`]:
//! - [`FilterChain::filter_block`] starts every call from a zeroed delay
//!   line. The band-pass in front of the FFT uses this, so each window is
//!   filtered independently of the previous one.
//! - [`FilterChain::process`] keeps the delay line between calls. The fold
//!   decimators use this so the decimated history stays continuous.
//!
//! The two are not interchangeable at block boundaries.

use std::f64::consts::PI;

/// Highest usable cutoff as a fraction of the sample rate
const MAX_CUTOFF_RATIO: f64 = 0.49;

/// Biquad coefficients, normalized so that `a0 == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

/// Transposed direct form II delay line
#[derive(Debug, Clone, Copy, Default)]
struct SectionState {
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// Pass-through section
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Second-order lowpass (RBJ cookbook)
    pub fn lowpass(cutoff: f64, q: f64, sample_rate: f64) -> Self {
        let (cos_w0, alpha) = match Self::prewarp(cutoff, q, sample_rate) {
            Some(v) => v,
            None => return Self::identity(),
        };
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos_w0) / 2.0 / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: (1.0 - cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Second-order highpass (RBJ cookbook)
    pub fn highpass(cutoff: f64, q: f64, sample_rate: f64) -> Self {
        let (cos_w0, alpha) = match Self::prewarp(cutoff, q, sample_rate) {
            Some(v) => v,
            None => return Self::identity(),
        };
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cos_w0) / 2.0 / a0,
            b1: -(1.0 + cos_w0) / a0,
            b2: (1.0 + cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// First-order lowpass (bilinear transform), stored as a degenerate biquad
    pub fn lowpass_first_order(cutoff: f64, sample_rate: f64) -> Self {
        let k = Self::tan_half(cutoff, sample_rate);
        if !k.is_finite() {
            return Self::identity();
        }
        Self {
            b0: k / (1.0 + k),
            b1: k / (1.0 + k),
            b2: 0.0,
            a1: (k - 1.0) / (k + 1.0),
            a2: 0.0,
        }
    }

    /// First-order highpass (bilinear transform)
    pub fn highpass_first_order(cutoff: f64, sample_rate: f64) -> Self {
        let k = Self::tan_half(cutoff, sample_rate);
        if !k.is_finite() {
            return Self::identity();
        }
        Self {
            b0: 1.0 / (1.0 + k),
            b1: -1.0 / (1.0 + k),
            b2: 0.0,
            a1: (k - 1.0) / (k + 1.0),
            a2: 0.0,
        }
    }

    fn clamp_cutoff(cutoff: f64, sample_rate: f64) -> f64 {
        cutoff.clamp(1e-3, sample_rate * MAX_CUTOFF_RATIO)
    }

    fn tan_half(cutoff: f64, sample_rate: f64) -> f64 {
        let cutoff = Self::clamp_cutoff(cutoff, sample_rate);
        (PI * cutoff / sample_rate).tan()
    }

    fn prewarp(cutoff: f64, q: f64, sample_rate: f64) -> Option<(f64, f64)> {
        let cutoff = Self::clamp_cutoff(cutoff, sample_rate);
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let alpha = w0.sin() / (2.0 * q.max(0.01));
        if !alpha.is_finite() {
            return None;
        }
        Some((w0.cos(), alpha))
    }

    #[inline]
    fn tick(&self, state: &mut SectionState, x: f64) -> f64 {
        let y = self.b0 * x + state.z1;
        state.z1 = self.b1 * x - self.a1 * y + state.z2;
        state.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// Q of each second-order section of an order-`order` Butterworth filter.
/// Odd orders get one extra first-order section, not listed here.
fn butterworth_q(order: usize) -> Vec<f64> {
    let n = order as f64;
    (0..order / 2)
        .map(|k| {
            // Angle of the k-th conjugate pole pair from the negative real axis
            let angle = if order % 2 == 0 {
                (2 * k + 1) as f64 * PI / (2.0 * n)
            } else {
                (k + 1) as f64 * PI / n
            };
            1.0 / (2.0 * angle.cos())
        })
        .collect()
}

/// Cascade of biquad sections with their delay lines.
#[derive(Debug, Clone)]
pub struct FilterChain {
    sections: Vec<Biquad>,
    state: Vec<SectionState>,
}

impl FilterChain {
    pub fn new(sections: Vec<Biquad>) -> Self {
        let state = vec![SectionState::default(); sections.len()];
        Self { sections, state }
    }

    /// Order-`order` Butterworth lowpass
    pub fn butterworth_lowpass(order: usize, cutoff: f64, sample_rate: f64) -> Self {
        let mut sections: Vec<Biquad> = butterworth_q(order)
            .into_iter()
            .map(|q| Biquad::lowpass(cutoff, q, sample_rate))
            .collect();
        if order % 2 == 1 {
            sections.push(Biquad::lowpass_first_order(cutoff, sample_rate));
        }
        Self::new(sections)
    }

    /// Order-`order` Butterworth highpass
    pub fn butterworth_highpass(order: usize, cutoff: f64, sample_rate: f64) -> Self {
        let mut sections: Vec<Biquad> = butterworth_q(order)
            .into_iter()
            .map(|q| Biquad::highpass(cutoff, q, sample_rate))
            .collect();
        if order % 2 == 1 {
            sections.push(Biquad::highpass_first_order(cutoff, sample_rate));
        }
        Self::new(sections)
    }

    /// Append another chain's sections after this one's
    pub fn then(mut self, other: FilterChain) -> Self {
        self.sections.extend(other.sections);
        self.state.extend(other.state);
        self
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Filter `signal` in place from a zeroed delay line. Does not touch
    /// the streaming state.
    pub fn filter_block(&self, signal: &mut [f64]) {
        for section in &self.sections {
            let mut state = SectionState::default();
            for x in signal.iter_mut() {
                *x = section.tick(&mut state, *x);
            }
        }
    }

    /// Filter `signal` in place, continuing from the previous call.
    pub fn process(&mut self, signal: &mut [f64]) {
        for (section, state) in self.sections.iter().zip(self.state.iter_mut()) {
            for x in signal.iter_mut() {
                *x = section.tick(state, *x);
            }
        }
    }

    /// Clear the streaming delay lines
    pub fn reset(&mut self) {
        self.state.fill(SectionState::default());
    }
}

/// Band-limiting filter applied to each analysis window before the FFT.
#[derive(Debug, Clone)]
pub struct FilterStage {
    band_pass: FilterChain,
}

impl FilterStage {
    /// Butterworth order of each half of the band-pass
    pub const BAND_PASS_ORDER: usize = 4;

    /// Highpass at `f0` followed by lowpass at `f1`. The lowpass half is
    /// left out when `f1` is at or above the usable band of `sample_rate`.
    pub fn new(f0: f64, f1: f64, sample_rate: f64) -> Self {
        let mut band_pass =
            FilterChain::butterworth_highpass(Self::BAND_PASS_ORDER, f0, sample_rate);
        if f1 < sample_rate * MAX_CUTOFF_RATIO {
            band_pass = band_pass.then(FilterChain::butterworth_lowpass(
                Self::BAND_PASS_ORDER,
                f1,
                sample_rate,
            ));
        }
        Self { band_pass }
    }

    /// Band-limit one window (block mode).
    pub fn apply(&self, window: &mut [f64]) {
        self.band_pass.filter_block(window);
    }

    pub fn chain(&self) -> &FilterChain {
        &self.band_pass
    }
}

/// Streaming anti-alias lowpass run before the 2:1 decimation that produces
/// fold `level` from fold `level - 1`. `input_rate` is the rate of fold
/// `level - 1`; the cutoff is 90% of the new Nyquist.
pub fn anti_alias_lowpass(input_rate: f64) -> FilterChain {
    const ORDER: usize = 8;
    let new_nyquist = input_rate / 4.0;
    FilterChain::butterworth_lowpass(ORDER, 0.9 * new_nyquist, input_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 48000.0;

    fn sine(freq: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / SAMPLE_RATE).sin())
            .collect()
    }

    /// RMS over the second half, after the filter has settled
    fn settled_rms(signal: &[f64]) -> f64 {
        let tail = &signal[signal.len() / 2..];
        (tail.iter().map(|x| x * x).sum::<f64>() / tail.len() as f64).sqrt()
    }

    fn assert_approx(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} +/- {tolerance}, got {actual}"
        );
    }

    #[test]
    fn butterworth_q_matches_known_values() {
        let q2 = butterworth_q(2);
        assert_approx(q2[0], std::f64::consts::FRAC_1_SQRT_2, 1e-9);

        let q4 = butterworth_q(4);
        assert_approx(q4[0], 0.541_196, 1e-5);
        assert_approx(q4[1], 1.306_563, 1e-5);

        let q3 = butterworth_q(3);
        assert_eq!(q3.len(), 1);
        assert_approx(q3[0], 1.0, 1e-9);
    }

    #[test]
    fn lowpass_passes_dc_with_unity_gain() {
        let chain = FilterChain::butterworth_lowpass(4, 1000.0, SAMPLE_RATE);
        let mut signal = vec![1.0; 4800];
        chain.filter_block(&mut signal);

        assert_approx(*signal.last().unwrap(), 1.0, 1e-6);
    }

    #[test]
    fn lowpass_attenuates_high_frequency() {
        let chain = FilterChain::butterworth_lowpass(4, 1000.0, SAMPLE_RATE);

        let mut low = sine(200.0, 9600);
        let mut high = sine(8000.0, 9600);
        chain.filter_block(&mut low);
        chain.filter_block(&mut high);

        assert_approx(settled_rms(&low), std::f64::consts::FRAC_1_SQRT_2, 0.02);
        // 3 octaves above cutoff at 24 dB/octave
        assert!(settled_rms(&high) < 0.005, "8kHz leaked: {}", settled_rms(&high));
    }

    #[test]
    fn odd_order_cutoff_is_three_db_down() {
        let chain = FilterChain::butterworth_highpass(3, 500.0, SAMPLE_RATE);
        assert_eq!(chain.sections().len(), 2);

        let mut at_cutoff = sine(500.0, 48000);
        chain.filter_block(&mut at_cutoff);
        assert_approx(settled_rms(&at_cutoff), 0.5, 0.02);
    }

    #[test]
    fn band_pass_keeps_in_band_and_rejects_rumble() {
        let stage = FilterStage::new(40.0, 20000.0, SAMPLE_RATE);
        assert_eq!(stage.chain().sections().len(), 4);

        let mut tone = sine(1000.0, 48000);
        let mut rumble = sine(5.0, 48000);
        stage.apply(&mut tone);
        stage.apply(&mut rumble);

        assert_approx(settled_rms(&tone), std::f64::consts::FRAC_1_SQRT_2, 0.01);
        assert!(settled_rms(&rumble) < 0.01, "rumble leaked: {}", settled_rms(&rumble));
    }

    #[test]
    fn band_pass_drops_lowpass_half_above_nyquist() {
        let stage = FilterStage::new(40.0, 20000.0, 12000.0);
        assert_eq!(stage.chain().sections().len(), 2);
    }

    #[test]
    fn block_mode_is_independent_between_calls() {
        let stage = FilterStage::new(40.0, 20000.0, SAMPLE_RATE);
        let input = sine(440.0, 2048);

        let mut first = input.clone();
        let mut second = input.clone();
        stage.apply(&mut first);
        stage.apply(&mut second);

        assert_eq!(first, second);
    }

    #[test]
    fn streaming_mode_is_continuous_across_blocks() {
        let input = sine(300.0, 4000);

        let mut whole = input.clone();
        let mut chain = FilterChain::butterworth_lowpass(8, 2000.0, SAMPLE_RATE);
        chain.process(&mut whole);

        let mut split = input.clone();
        let mut chain = FilterChain::butterworth_lowpass(8, 2000.0, SAMPLE_RATE);
        let (head, tail) = split.split_at_mut(1234);
        chain.process(head);
        chain.process(tail);

        for (a, b) in whole.iter().zip(split.iter()) {
            assert_approx(*a, *b, 1e-12);
        }
    }

    #[test]
    fn reset_clears_streaming_state() {
        let mut chain = FilterChain::butterworth_lowpass(2, 500.0, SAMPLE_RATE);
        let mut warm = vec![1.0; 100];
        chain.process(&mut warm);
        chain.reset();

        let mut impulse = vec![0.0; 8];
        chain.process(&mut impulse);
        assert!(impulse.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn anti_alias_rejects_content_above_new_nyquist() {
        let chain = anti_alias_lowpass(SAMPLE_RATE);
        let mut passband = sine(4000.0, 9600);
        let mut alias = sine(18000.0, 9600);
        chain.filter_block(&mut passband);
        chain.filter_block(&mut alias);

        assert_approx(settled_rms(&passband), std::f64::consts::FRAC_1_SQRT_2, 0.03);
        assert!(settled_rms(&alias) < 0.001, "alias leaked: {}", settled_rms(&alias));
    }
}
