//! Linear FFT bins to log-spaced display bins

use serde::Deserialize;

/// How linear-frequency values are folded onto the log axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinMapping {
    /// Linear interpolation at each log-bin center. Smooth, but narrow
    /// peaks between two centers can be missed at high frequencies.
    #[default]
    Interpolate,

    /// Every linear bin is added to the log bin whose range contains it.
    /// Preserves per-band energy; low log bins that no linear bin falls
    /// into stay empty.
    Sum,
}

/// Center frequencies of the FFT bins: `k * sample_rate / window_size`
/// for `k` in `0..=window_size / 2`.
pub fn linear_bins(window_size: usize, sample_rate: f64) -> Vec<f64> {
    let resolution = sample_rate / window_size as f64;
    (0..=window_size / 2).map(|k| k as f64 * resolution).collect()
}

/// `count` centers evenly spaced in log2 between `f0` and `f1` (inclusive).
pub fn log_bins(f0: f64, f1: f64, count: usize) -> Vec<f64> {
    if count == 1 {
        return vec![f0];
    }
    let (lo, hi) = (f0.log2(), f1.log2());
    let step = (hi - lo) / (count - 1) as f64;
    (0..count).map(|i| (lo + step * i as f64).exp2()).collect()
}

/// The two frequency axes of one analysis path.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyAxis {
    linear: Vec<f64>,
    log: Vec<f64>,
}

impl FrequencyAxis {
    pub fn new(window_size: usize, sample_rate: f64, f0: f64, f1: f64, resolution: usize) -> Self {
        Self {
            linear: linear_bins(window_size, sample_rate),
            log: log_bins(f0, f1, resolution),
        }
    }

    pub fn linear_bins(&self) -> &[f64] {
        &self.linear
    }

    pub fn log_bins(&self) -> &[f64] {
        &self.log
    }

    /// Spacing between linear bins in Hz
    pub fn resolution(&self) -> f64 {
        self.linear.get(1).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
enum Plan {
    /// Per log bin: left linear index and weight of the right neighbour
    Interpolate(Vec<(usize, f64)>),
    /// Per linear bin: the log bin it belongs to, if any
    Sum(Vec<Option<usize>>),
}

/// Precomputed remap from one linear axis onto a log axis.
#[derive(Debug, Clone)]
pub struct FrequencyBinMapper {
    plan: Plan,
    linear_len: usize,
    log_len: usize,
}

impl FrequencyBinMapper {
    /// `linear` must be non-decreasing, `log` strictly increasing.
    pub fn new(linear: &[f64], log: &[f64], strategy: BinMapping) -> Self {
        let plan = match strategy {
            BinMapping::Interpolate => Plan::Interpolate(interpolation_plan(linear, log)),
            BinMapping::Sum => Plan::Sum(summing_plan(linear, log)),
        };
        Self {
            plan,
            linear_len: linear.len(),
            log_len: log.len(),
        }
    }

    pub fn for_axis(axis: &FrequencyAxis, strategy: BinMapping) -> Self {
        Self::new(axis.linear_bins(), axis.log_bins(), strategy)
    }

    /// Map `values` (one per linear bin) into `out` (one per log bin).
    pub fn map_into(&self, values: &[f64], out: &mut [f64]) {
        debug_assert_eq!(values.len(), self.linear_len);
        debug_assert_eq!(out.len(), self.log_len);

        match &self.plan {
            Plan::Interpolate(points) => {
                for (slot, &(left, weight)) in out.iter_mut().zip(points) {
                    let right = (left + 1).min(values.len() - 1);
                    *slot = values[left] * (1.0 - weight) + values[right] * weight;
                }
            }
            Plan::Sum(targets) => {
                out.fill(0.0);
                for (&value, target) in values.iter().zip(targets) {
                    if let Some(bin) = *target {
                        out[bin] += value;
                    }
                }
            }
        }
    }

    pub fn map(&self, values: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.log_len];
        self.map_into(values, &mut out);
        out
    }
}

/// Interpolation points, clamped to the end values outside the linear axis.
fn interpolation_plan(linear: &[f64], log: &[f64]) -> Vec<(usize, f64)> {
    let last = linear.len().saturating_sub(1);
    log.iter()
        .map(|&freq| {
            if linear.is_empty() || freq <= linear[0] {
                return (0, 0.0);
            }
            if freq >= linear[last] {
                return (last, 0.0);
            }
            // First index with linear[i] > freq; freq lies in [i - 1, i).
            let right = linear.partition_point(|&f| f <= freq);
            let left = right - 1;
            let span = linear[right] - linear[left];
            let weight = if span > 0.0 {
                (freq - linear[left]) / span
            } else {
                0.0
            };
            (left, weight)
        })
        .collect()
}

/// Assign linear bins to log bins. Log bin `i` covers the range between the
/// geometric midpoints to its neighbours; the outer edges extend by half a
/// step beyond the first and last centers.
fn summing_plan(linear: &[f64], log: &[f64]) -> Vec<Option<usize>> {
    let edges = log_bin_edges(log);
    linear
        .iter()
        .map(|&freq| {
            if edges.is_empty() || freq < edges[0] || freq >= edges[edges.len() - 1] {
                return None;
            }
            Some(edges.partition_point(|&e| e <= freq) - 1)
        })
        .collect()
}

fn log_bin_edges(log: &[f64]) -> Vec<f64> {
    match log.len() {
        0 => Vec::new(),
        1 => vec![log[0] / 2f64.sqrt(), log[0] * 2f64.sqrt()],
        n => {
            let mut edges = Vec::with_capacity(n + 1);
            let first_ratio = (log[1] / log[0]).sqrt();
            edges.push(log[0] / first_ratio);
            edges.extend(log.windows(2).map(|pair| (pair[0] * pair[1]).sqrt()));
            let last_ratio = (log[n - 1] / log[n - 2]).sqrt();
            edges.push(log[n - 1] * last_ratio);
            edges
        }
    }
}
