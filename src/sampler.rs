//! Rolling sample storage for cumulative OS counters.
//!
//! `DataSampler` keeps the last `N` readings of one counter together with the
//! time they were taken, and derives deltas and per-second rates from them.
//! Index 0 is always the most recent sample. The sampler does no locking of
//! its own; owners serialize access.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{PalError, Result};

/// Numeric types that can be stored in a [`DataSampler`].
pub trait SampleValue: Copy + Default + PartialOrd + fmt::Debug + Send + Sync + 'static {
    /// `newer - older`, clamped to zero when the counter went backwards
    /// (reset, wrap or reboot).
    fn saturating_delta(newer: Self, older: Self) -> Self;

    /// Lossy conversion used for rate computation.
    fn as_f64(self) -> f64;

    /// Integer or float division by a sample count.
    fn div_count(self, count: usize) -> Self;
}

macro_rules! impl_unsigned_sample_value {
    ($($t:ty),*) => {
        $(
            impl SampleValue for $t {
                fn saturating_delta(newer: Self, older: Self) -> Self {
                    newer.saturating_sub(older)
                }

                fn as_f64(self) -> f64 {
                    self as f64
                }

                fn div_count(self, count: usize) -> Self {
                    if count == 0 {
                        0
                    } else {
                        self / count as $t
                    }
                }
            }
        )*
    };
}

impl_unsigned_sample_value!(u32, u64);

impl SampleValue for i64 {
    fn saturating_delta(newer: Self, older: Self) -> Self {
        if newer < older {
            0
        } else {
            newer.saturating_sub(older)
        }
    }

    fn as_f64(self) -> f64 {
        self as f64
    }

    fn div_count(self, count: usize) -> Self {
        if count == 0 {
            0
        } else {
            self / count as i64
        }
    }
}

impl SampleValue for f64 {
    fn saturating_delta(newer: Self, older: Self) -> Self {
        (newer - older).max(0.0)
    }

    fn as_f64(self) -> f64 {
        self
    }

    fn div_count(self, count: usize) -> Self {
        if count == 0 {
            0.0
        } else {
            self / count as f64
        }
    }
}

/// One reading with the instant it was taken.
#[derive(Debug, Clone, Copy)]
pub struct Sample<T> {
    pub value: T,
    pub at: Instant,
}

/// Fixed-capacity circular buffer of the `N` most recent samples of a counter.
#[derive(Clone)]
pub struct DataSampler<T: SampleValue, const N: usize> {
    entries: Vec<Sample<T>>,
    write_index: usize,
}

impl<T: SampleValue, const N: usize> Default for DataSampler<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SampleValue, const N: usize> fmt::Debug for DataSampler<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSampler")
            .field("capacity", &N)
            .field("samples", &self.history())
            .finish()
    }
}

impl<T: SampleValue, const N: usize> DataSampler<T, N> {
    /// Creates an empty sampler.
    pub fn new() -> Self {
        assert!(N > 0, "DataSampler capacity must be non-zero");
        Self {
            entries: Vec::with_capacity(N),
            write_index: 0,
        }
    }

    /// Pushes a reading taken now.
    pub fn add_sample(&mut self, value: T) {
        self.add_sample_at(value, Instant::now());
    }

    /// Pushes a reading taken at `at`. The oldest sample is evicted once
    /// the sampler is full.
    pub fn add_sample_at(&mut self, value: T, at: Instant) {
        let sample = Sample { value, at };
        if self.entries.len() < N {
            self.entries.push(sample);
        } else {
            self.entries[self.write_index] = sample;
        }
        self.write_index = (self.write_index + 1) % N;
    }

    /// Number of samples currently held, in `[0, N]`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.write_index = 0;
    }

    /// Returns the `pos`-th most recent sample (0 = newest).
    pub fn sample(&self, pos: usize) -> Result<Sample<T>> {
        let len = self.entries.len();
        if pos >= len {
            return Err(PalError::illegal_index("sample", pos, len));
        }
        // write_index points one past the newest slot.
        let idx = (self.write_index + N - 1 - pos) % N;
        Ok(self.entries[idx])
    }

    /// Returns the value of the `pos`-th most recent sample (0 = newest).
    pub fn get(&self, pos: usize) -> Result<T> {
        self.sample(pos).map(|s| s.value)
    }

    /// Most recent value, if any.
    pub fn newest(&self) -> Option<T> {
        self.get(0).ok()
    }

    /// All values, newest first.
    pub fn history(&self) -> Vec<T> {
        (0..self.len()).filter_map(|i| self.get(i).ok()).collect()
    }

    /// Position of the older endpoint when looking `samples` readings back,
    /// or `None` when fewer than two readings are available.
    fn older_pos(&self, samples: usize) -> Option<usize> {
        let len = self.len();
        if len < 2 || samples < 2 {
            return None;
        }
        Some(samples.min(len) - 1)
    }

    /// Difference between the newest reading and the one `samples - 1`
    /// positions back (clamped to the oldest held). Negative differences
    /// are clamped to zero.
    pub fn delta(&self, samples: usize) -> Option<T> {
        let older = self.older_pos(samples)?;
        let newest = self.get(0).ok()?;
        let oldest = self.get(older).ok()?;
        Some(T::saturating_delta(newest, oldest))
    }

    /// `delta(samples)` divided by the number of intervals it spans.
    pub fn average_delta(&self, samples: usize) -> Option<T> {
        let older = self.older_pos(samples)?;
        self.delta(samples).map(|d| d.div_count(older))
    }

    /// Wall time spanned by `delta(samples)`.
    pub fn elapsed(&self, samples: usize) -> Option<Duration> {
        let older = self.older_pos(samples)?;
        let newest = self.sample(0).ok()?;
        let oldest = self.sample(older).ok()?;
        Some(newest.at.saturating_duration_since(oldest.at))
    }

    /// Per-second rate over the last `samples` readings.
    pub fn rate_per_second(&self, samples: usize) -> Option<f64> {
        let older = self.older_pos(samples)?;
        let newest = self.sample(0).ok()?;
        let oldest = self.sample(older).ok()?;
        rate(oldest.value, oldest.at, newest.value, newest.at)
    }
}

/// Computes `(v2 - v1) / (t2 - t1)` in units per second.
///
/// A counter that decreased yields `Some(0.0)`; a zero or negative time span
/// yields `None`.
pub fn rate<T: SampleValue>(v1: T, t1: Instant, v2: T, t2: Instant) -> Option<f64> {
    let elapsed = t2.checked_duration_since(t1)?.as_secs_f64();
    if elapsed <= 0.0 {
        return None;
    }
    Some(T::saturating_delta(v2, v1).as_f64() / elapsed)
}

/// Computes `part / whole * 100`, rounded to the nearest integer and
/// returning 0 when `whole` is zero.
pub fn percentage(part: f64, whole: f64) -> u64 {
    if whole <= 0.0 {
        return 0;
    }
    ((part / whole) * 100.0).round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_push_and_read() {
        let mut s: DataSampler<u64, 3> = DataSampler::new();

        assert_eq!(s.len(), 0);
        assert_eq!(s.capacity(), 3);
        assert!(s.newest().is_none());

        s.add_sample(100);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(0).unwrap(), 100);
    }

    #[test]
    fn test_sampler_newest_first_order() {
        let mut s: DataSampler<u64, 3> = DataSampler::new();
        for v in [10, 20, 30] {
            s.add_sample(v);
        }
        assert_eq!(s.history(), vec![30, 20, 10]);
    }

    #[test]
    fn test_sampler_wraparound() {
        let mut s: DataSampler<u64, 3> = DataSampler::new();

        for v in 0..5u64 {
            s.add_sample(v * 100);
        }

        // Only the last 3 readings remain, newest first
        assert_eq!(s.len(), 3);
        assert_eq!(s.get(0).unwrap(), 400);
        assert_eq!(s.get(1).unwrap(), 300);
        assert_eq!(s.get(2).unwrap(), 200);
    }

    #[test]
    fn test_sampler_out_of_range() {
        let mut s: DataSampler<u64, 6> = DataSampler::new();
        s.add_sample(1);
        s.add_sample(2);

        match s.get(2) {
            Err(PalError::IllegalIndex { index, bounds, .. }) => {
                assert_eq!(index, 2);
                assert_eq!(bounds.upper, 2);
            }
            other => panic!("expected IllegalIndex, got {other:?}"),
        }
    }

    #[test]
    fn test_delta_needs_two_samples() {
        let mut s: DataSampler<u64, 6> = DataSampler::new();
        assert!(s.delta(6).is_none());
        s.add_sample(5);
        assert!(s.delta(6).is_none());
        assert!(s.rate_per_second(6).is_none());
        s.add_sample(9);
        assert_eq!(s.delta(6), Some(4));
    }

    #[test]
    fn test_delta_clamps_counter_reset() {
        let mut s: DataSampler<u64, 2> = DataSampler::new();
        s.add_sample(1000);
        s.add_sample(10);
        assert_eq!(s.delta(2), Some(0));
    }

    #[test]
    fn test_average_delta_spans_all_intervals() {
        let t0 = Instant::now();
        let mut s: DataSampler<u64, 6> = DataSampler::new();
        for i in 0..6u64 {
            s.add_sample_at(i * 60, t0 + Duration::from_secs(i * 60));
        }
        assert_eq!(s.delta(6), Some(300));
        assert_eq!(s.average_delta(6), Some(60));
        assert_eq!(s.elapsed(6), Some(Duration::from_secs(300)));
        let r = s.rate_per_second(6).unwrap();
        assert!((r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_formula_and_clamp() {
        let t1 = Instant::now();
        let t2 = t1 + Duration::from_secs(4);

        assert_eq!(rate(100u64, t1, 300u64, t2), Some(50.0));
        assert_eq!(rate(300u64, t1, 100u64, t2), Some(0.0));
        assert_eq!(rate(1u64, t1, 2u64, t1), None);
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(1.0, 4.0), 25);
        assert_eq!(percentage(5.0, 0.0), 0);
    }
}
