//! Octave folding
//!
//! Fold `k` analyses the input decimated by `2^k`, so its window covers
//! `2^k` times more time and its bins are `2^k` times narrower. Folds are
//! produced in cascade: each one is the previous fold lowpassed and
//! subsampled 2:1.

use super::filter::{anti_alias_lowpass, FilterChain};
use serde::Deserialize;

/// How per-fold spectra are merged into one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldCombine {
    /// Fold 0 is the baseline; each deeper fold replaces the log bins
    /// below its cutoff
    #[default]
    Overwrite,

    /// Every log bin is the mean over the folds that cover it
    Average,
}

/// Log bins centered below this frequency are taken from fold `level`.
/// Halfway up the fold's band, where its resolution still beats the next
/// shallower fold and the anti-alias rolloff has not started.
pub fn fold_cutoff(sample_rate: f64, level: usize) -> f64 {
    sample_rate / 2f64.powi(level as i32 + 2)
}

/// Streaming 2:1 decimator.
#[derive(Debug, Clone)]
pub struct Decimator {
    anti_alias: FilterChain,
    keep_next: bool,
    scratch: Vec<f64>,
}

impl Decimator {
    /// `input_rate` is the rate of the signal fed to [`Decimator::process`].
    pub fn new(input_rate: f64) -> Self {
        Self {
            anti_alias: anti_alias_lowpass(input_rate),
            keep_next: true,
            scratch: Vec::new(),
        }
    }

    /// Lowpass `input` and keep every other sample into `out` (cleared
    /// first). Filter state and subsampling phase carry across calls, so
    /// splitting the input differently gives the same output stream.
    pub fn process(&mut self, input: &[f64], out: &mut Vec<f64>) {
        self.scratch.clear();
        self.scratch.extend_from_slice(input);
        self.anti_alias.process(&mut self.scratch);

        out.clear();
        out.reserve(input.len() / 2 + 1);
        for &x in &self.scratch {
            if self.keep_next {
                out.push(x);
            }
            self.keep_next = !self.keep_next;
        }
    }

    pub fn reset(&mut self) {
        self.anti_alias.reset();
        self.keep_next = true;
    }
}

/// Log-binned output of one fold (or of the merged frame)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoldOutput {
    pub spectrum: Vec<f64>,
    pub harmonicity: Vec<f64>,
}

impl FoldOutput {
    pub fn new(resolution: usize) -> Self {
        Self {
            spectrum: vec![0.0; resolution],
            harmonicity: vec![0.0; resolution],
        }
    }
}

/// Merge per-fold outputs into `out`. `folds[k]` is fold `k`, `cutoffs[k]`
/// its cutoff from [`fold_cutoff`] (fold 0's is ignored).
pub fn combine_folds(
    mode: FoldCombine,
    log_bins: &[f64],
    folds: &[FoldOutput],
    cutoffs: &[f64],
    out: &mut FoldOutput,
) {
    let Some(base) = folds.first() else {
        return;
    };
    out.spectrum.clone_from(&base.spectrum);
    out.harmonicity.clone_from(&base.harmonicity);

    match mode {
        FoldCombine::Overwrite => {
            for (fold, &cutoff) in folds.iter().zip(cutoffs).skip(1) {
                for (i, _) in log_bins.iter().enumerate().take_while(|&(_, &f)| f < cutoff) {
                    out.spectrum[i] = fold.spectrum[i];
                    out.harmonicity[i] = fold.harmonicity[i];
                }
            }
        }
        FoldCombine::Average => {
            for (i, &freq) in log_bins.iter().enumerate() {
                let mut count = 1usize;
                for (fold, &cutoff) in folds.iter().zip(cutoffs).skip(1) {
                    if freq >= cutoff {
                        // Cutoffs halve with depth, so no deeper fold covers it either.
                        break;
                    }
                    out.spectrum[i] += fold.spectrum[i];
                    out.harmonicity[i] += fold.harmonicity[i];
                    count += 1;
                }
                out.spectrum[i] /= count as f64;
                out.harmonicity[i] /= count as f64;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn assert_approx(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} +/- {tolerance}, got {actual}"
        );
    }

    fn rms(signal: &[f64]) -> f64 {
        (signal.iter().map(|x| x * x).sum::<f64>() / signal.len() as f64).sqrt()
    }

    fn constant(resolution: usize, value: f64) -> FoldOutput {
        FoldOutput {
            spectrum: vec![value; resolution],
            harmonicity: vec![value / 10.0; resolution],
        }
    }

    #[test]
    fn cutoffs_halve_with_each_fold() {
        assert_approx(fold_cutoff(48000.0, 0), 12000.0, 1e-9);
        assert_approx(fold_cutoff(48000.0, 1), 6000.0, 1e-9);
        assert_approx(fold_cutoff(48000.0, 3), 1500.0, 1e-9);
    }

    #[test]
    fn decimator_halves_sample_count_across_odd_chunks() {
        let mut decimator = Decimator::new(48000.0);
        let mut out = Vec::new();
        let mut total = 0;
        for len in [3usize, 5, 1, 7] {
            decimator.process(&vec![0.0; len], &mut out);
            total += out.len();
        }
        assert_eq!(total, 8);
    }

    #[test]
    fn decimator_output_does_not_depend_on_chunking() {
        let input: Vec<f64> = (0..3001)
            .map(|i| (2.0 * PI * 700.0 * i as f64 / 48000.0).sin())
            .collect();

        let mut whole = Vec::new();
        Decimator::new(48000.0).process(&input, &mut whole);

        let mut decimator = Decimator::new(48000.0);
        let mut split = Vec::new();
        let mut out = Vec::new();
        for chunk in input.chunks(333) {
            decimator.process(chunk, &mut out);
            split.extend_from_slice(&out);
        }

        assert_eq!(whole.len(), split.len());
        for (a, b) in whole.iter().zip(&split) {
            assert_approx(*a, *b, 1e-12);
        }
    }

    #[test]
    fn decimator_passes_low_tones_and_blocks_aliases() {
        let tone = |freq: f64| -> Vec<f64> {
            (0..19200)
                .map(|i| (2.0 * PI * freq * i as f64 / 48000.0).sin())
                .collect()
        };

        let mut out = Vec::new();
        Decimator::new(48000.0).process(&tone(1000.0), &mut out);
        assert_approx(rms(&out[out.len() / 2..]), std::f64::consts::FRAC_1_SQRT_2, 0.02);

        // 20 kHz would fold onto 4 kHz at the new 24 kHz rate
        Decimator::new(48000.0).process(&tone(20000.0), &mut out);
        assert!(rms(&out[out.len() / 2..]) < 0.001);
    }

    #[test]
    fn reset_restarts_the_phase() {
        let mut decimator = Decimator::new(48000.0);
        let mut out = Vec::new();
        decimator.process(&[1.0], &mut out);
        decimator.reset();
        decimator.process(&[0.0, 0.0, 0.0], &mut out);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn overwrite_replaces_bins_below_each_cutoff() {
        let log_bins = [100.0, 1000.0, 5000.0, 10000.0];
        let cutoffs = [12000.0, 6000.0, 3000.0];
        let folds = [constant(4, 1.0), constant(4, 2.0), constant(4, 3.0)];
        let mut out = FoldOutput::new(4);

        combine_folds(FoldCombine::Overwrite, &log_bins, &folds, &cutoffs, &mut out);

        assert_eq!(out.spectrum, vec![3.0, 3.0, 2.0, 1.0]);
        for (h, s) in out.harmonicity.iter().zip(&out.spectrum) {
            assert_approx(*h, s / 10.0, 1e-12);
        }
    }

    #[test]
    fn average_means_over_covering_folds() {
        let log_bins = [100.0, 5000.0, 10000.0];
        let cutoffs = [12000.0, 6000.0, 3000.0];
        let folds = [constant(3, 1.0), constant(3, 2.0), constant(3, 6.0)];
        let mut out = FoldOutput::new(3);

        combine_folds(FoldCombine::Average, &log_bins, &folds, &cutoffs, &mut out);

        assert_approx(out.spectrum[0], 3.0, 1e-12);
        assert_approx(out.spectrum[1], 1.5, 1e-12);
        assert_approx(out.spectrum[2], 1.0, 1e-12);
    }

    #[test]
    fn single_fold_is_copied_through() {
        let log_bins = [100.0, 200.0];
        let folds = [FoldOutput {
            spectrum: vec![0.25, 0.5],
            harmonicity: vec![0.0, 0.9],
        }];
        let mut out = FoldOutput::new(2);

        for mode in [FoldCombine::Overwrite, FoldCombine::Average] {
            combine_folds(mode, &log_bins, &folds, &[12000.0], &mut out);
            assert_eq!(out, folds[0]);
        }
    }
}
