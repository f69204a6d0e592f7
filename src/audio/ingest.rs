//! Lock-protected circular buffer between the capture thread and the analyzer

use super::Sample;
use parking_lot::Mutex;

/// Samples read from an [`IngestBuffer`] since a reader's last cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreshSamples {
    /// New samples, oldest first (at most `capacity` of them)
    pub samples: Vec<Sample>,

    /// Cursor to pass to the next `read_since` call
    pub cursor: u64,

    /// Samples that were overwritten before this reader saw them
    pub dropped: u64,
}

struct Ring {
    samples: Vec<Sample>,
    write_pos: usize,
    written: u64,
}

/// Fixed-capacity ring of the most recent samples.
///
/// Written by the capture producer, read by the analyzer. Every read copies
/// out under the lock, so a reader never sees a partially applied write.
pub struct IngestBuffer {
    ring: Mutex<Ring>,
    capacity: usize,
}

impl IngestBuffer {
    /// Create a zero-filled buffer. A zero capacity is bumped to one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                samples: vec![0.0; capacity],
                write_pos: 0,
                written: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of samples ever written
    pub fn total_written(&self) -> u64 {
        self.ring.lock().written
    }

    /// Append a chunk. Only the last `capacity` samples of an oversized chunk
    /// are kept.
    pub fn write(&self, chunk: &[Sample]) {
        if chunk.is_empty() {
            return;
        }

        let cap = self.capacity;
        let n = chunk.len().min(cap);
        let tail = &chunk[chunk.len() - n..];

        let mut ring = self.ring.lock();
        let start = (ring.write_pos + (chunk.len() - n) % cap) % cap;
        let first = (cap - start).min(n);
        ring.samples[start..start + first].copy_from_slice(&tail[..first]);
        ring.samples[..n - first].copy_from_slice(&tail[first..]);

        ring.write_pos = (ring.write_pos + chunk.len() % cap) % cap;
        ring.written += chunk.len() as u64;
    }

    /// The last `capacity` samples in time order (oldest first).
    pub fn snapshot(&self) -> Vec<Sample> {
        let ring = self.ring.lock();
        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&ring.samples[ring.write_pos..]);
        out.extend_from_slice(&ring.samples[..ring.write_pos]);
        out
    }

    /// Samples written after `cursor`, oldest first.
    ///
    /// Readers keep their own cursor (start from 0). A cursor from the future
    /// is treated as up to date.
    pub fn read_since(&self, cursor: u64) -> FreshSamples {
        let ring = self.ring.lock();
        let available = ring.written.saturating_sub(cursor);
        let count = available.min(self.capacity as u64) as usize;

        let start = (ring.write_pos + self.capacity - count) % self.capacity;
        let first = (self.capacity - start).min(count);

        let mut samples = Vec::with_capacity(count);
        samples.extend_from_slice(&ring.samples[start..start + first]);
        samples.extend_from_slice(&ring.samples[..count - first]);

        FreshSamples {
            samples,
            cursor: ring.written,
            dropped: available - count as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn empty_buffer_snapshots_zeros() {
        let buffer = IngestBuffer::new(4);
        assert_eq!(buffer.snapshot(), vec![0.0; 4]);
        assert_eq!(buffer.total_written(), 0);
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    fn zero_capacity_holds_one_sample() {
        let buffer = IngestBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);

        buffer.write(&[1.0, 2.0]);
        assert_eq!(buffer.snapshot(), vec![2.0]);
    }

    #[test]
    fn snapshot_returns_recent_samples_in_order() {
        let buffer = IngestBuffer::new(8);
        buffer.write(&[1.0, 2.0, 3.0, 4.0]);

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot, vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn circular_buffer_wraps_and_preserves_time_order() {
        let buffer = IngestBuffer::new(5);
        buffer.write(&[1.0, 2.0, 3.0]);
        buffer.write(&[4.0, 5.0, 6.0]);

        assert_eq!(buffer.snapshot(), vec![2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn full_capacity_write_round_trips_exactly() {
        for capacity in [1usize, 2, 7, 64, 1000] {
            let buffer = IngestBuffer::new(capacity);
            // Offset the cursor so the full write straddles the wrap point.
            buffer.write(&[9.0; 3]);

            let x: Vec<Sample> = (0..capacity).map(|i| i as Sample * 0.5 - 3.0).collect();
            buffer.write(&x);
            assert_eq!(buffer.snapshot(), x, "capacity {capacity}");
        }
    }

    #[test]
    fn oversized_write_keeps_only_the_tail() {
        let buffer = IngestBuffer::new(6);
        buffer.write(&[100.0, 101.0]);

        let chunk: Vec<Sample> = (0..23).map(|i| i as Sample).collect();
        buffer.write(&chunk);

        assert_eq!(buffer.snapshot(), chunk[chunk.len() - 6..].to_vec());
        assert_eq!(buffer.total_written(), 25);
    }

    #[test]
    fn read_since_returns_only_new_samples() {
        let buffer = IngestBuffer::new(8);
        buffer.write(&[1.0, 2.0, 3.0]);

        let first = buffer.read_since(0);
        assert_eq!(first.samples, vec![1.0, 2.0, 3.0]);
        assert_eq!(first.cursor, 3);
        assert_eq!(first.dropped, 0);

        buffer.write(&[4.0, 5.0]);
        let second = buffer.read_since(first.cursor);
        assert_eq!(second.samples, vec![4.0, 5.0]);

        let idle = buffer.read_since(second.cursor);
        assert!(idle.samples.is_empty());
        assert_eq!(idle.cursor, second.cursor);
    }

    #[test]
    fn read_since_reports_overwritten_samples() {
        let buffer = IngestBuffer::new(4);
        buffer.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        buffer.write(&[7.0]);

        let fresh = buffer.read_since(0);
        assert_eq!(fresh.samples, vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(fresh.dropped, 3);
        assert_eq!(fresh.cursor, 7);
    }

    #[test]
    fn future_cursor_reads_nothing() {
        let buffer = IngestBuffer::new(4);
        buffer.write(&[1.0]);

        let fresh = buffer.read_since(50);
        assert!(fresh.samples.is_empty());
        assert_eq!(fresh.dropped, 0);
    }

    #[test]
    fn concurrent_snapshots_never_observe_torn_writes() {
        const CAPACITY: usize = 257;
        let buffer = Arc::new(IngestBuffer::new(CAPACITY));

        // Prefill with a consecutive ramp so every snapshot must be one.
        let prefill: Vec<Sample> = (1..=CAPACITY).map(|i| i as Sample).collect();
        buffer.write(&prefill);

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let buffer = buffer.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut next = CAPACITY + 1;
                for chunk_len in (1..400).cycle().take(2000) {
                    let chunk: Vec<Sample> =
                        (next..next + chunk_len % 97 + 1).map(|i| i as Sample).collect();
                    next += chunk.len();
                    buffer.write(&chunk);
                }
                done.store(true, Ordering::Release);
            })
        };

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let buffer = buffer.clone();
                let done = done.clone();
                thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        let snapshot = buffer.snapshot();
                        assert_eq!(snapshot.len(), CAPACITY);
                        for pair in snapshot.windows(2) {
                            assert_eq!(pair[1] - pair[0], 1.0, "torn snapshot");
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
