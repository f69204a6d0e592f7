//! Rolling analysis window fed by chunks of arbitrary length

/// Circular buffer holding the most recent `len()` samples for the FFT.
#[derive(Debug, Clone)]
pub struct AnalysisWindow {
    raw: Vec<f64>,
    c_idx: usize,
}

impl AnalysisWindow {
    pub fn new(size: usize) -> Self {
        Self {
            raw: vec![0.0; size.max(1)],
            c_idx: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Position of the oldest sample (the next one to be overwritten)
    pub fn cursor(&self) -> usize {
        self.c_idx
    }

    /// Roll a chunk into the window. Chunks longer than the window only
    /// contribute their last `len()` samples.
    pub fn push(&mut self, chunk: &[f64]) {
        let size = self.raw.len();
        let n = chunk.len().min(size);
        if n == 0 {
            return;
        }
        let data = &chunk[chunk.len() - n..];

        let e_idx = (self.c_idx + n) % size;
        if e_idx <= self.c_idx {
            // Wraps (or covers the whole window when n == size).
            let head = size - self.c_idx;
            self.raw[self.c_idx..].copy_from_slice(&data[..head]);
            self.raw[..e_idx].copy_from_slice(&data[head..]);
        } else {
            self.raw[self.c_idx..e_idx].copy_from_slice(data);
        }
        self.c_idx = e_idx;
    }

    /// The window unrolled into time order, oldest first.
    pub fn materialize(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.raw.len()];
        self.materialize_into(&mut out);
        out
    }

    /// Unroll into `out`, which must be exactly `len()` long.
    pub fn materialize_into(&self, out: &mut [f64]) {
        let head = self.raw.len() - self.c_idx;
        out[..head].copy_from_slice(&self.raw[self.c_idx..]);
        out[head..].copy_from_slice(&self.raw[..self.c_idx]);
    }
}
