use std::collections::VecDeque;

use super::{Sample, SmoothedReading};

pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// A sliding window moving average over raw sensor values.
///
/// Heart rate readings are single noisy instants. Averaging the last few
/// damps isolated spikes while still following a genuine rise within about
/// one window of samples.
#[derive(Debug, Clone)]
pub struct SampleSmoother {
    window: VecDeque<f64>,
    window_size: usize,
}

impl SampleSmoother {
    /// Creates a smoother averaging over `window_size` samples (at least one).
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Adds a sample to the window and returns the new average.
    ///
    /// Non-finite values are dropped; the previous reading is returned
    /// unchanged, or `None` if nothing valid has arrived yet.
    pub fn ingest(&mut self, sample: Sample) -> Option<SmoothedReading> {
        if !sample.value.is_finite() {
            return self.current();
        }

        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(sample.value);

        self.current()
    }

    /// The average of the current window, or `None` before the first sample.
    pub fn current(&self) -> Option<SmoothedReading> {
        if self.window.is_empty() {
            return None;
        }

        let sum: f64 = self.window.iter().sum();
        Some(SmoothedReading {
            average: sum / self.window.len() as f64,
            sample_count: self.window.len(),
        })
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

impl Default for SampleSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn feed(smoother: &mut SampleSmoother, values: &[f64]) -> Option<SmoothedReading> {
        let mut last = None;
        for &value in values {
            last = smoother.ingest(Sample::now(value));
        }
        last
    }

    #[test]
    fn should_have_no_reading_before_first_sample() {
        let smoother = SampleSmoother::new(5);

        assert_eq!(smoother.current(), None);
    }

    #[test]
    fn should_return_first_value_as_average() {
        let mut smoother = SampleSmoother::new(5);

        let reading = smoother.ingest(Sample::now(72.0)).unwrap();

        assert_eq!(reading.average, 72.0);
        assert_eq!(reading.sample_count, 1);
    }

    #[test]
    fn should_average_known_spike_sequence() {
        let mut smoother = SampleSmoother::new(5);

        let reading = feed(&mut smoother, &[60.0, 62.0, 64.0, 150.0, 150.0]).unwrap();

        assert!((reading.average - 97.2).abs() < 1e-9);
        assert_eq!(reading.sample_count, 5);
    }

    #[test]
    fn should_evict_oldest_sample_when_full() {
        let mut smoother = SampleSmoother::new(3);

        let reading = feed(&mut smoother, &[10.0, 20.0, 30.0, 40.0]).unwrap();

        assert_eq!(reading.sample_count, 3);
        assert_eq!(reading.average, 30.0);
        assert_eq!(*smoother.window.front().unwrap(), 20.0);
    }

    #[test_case(1 ; "single sample window")]
    #[test_case(2 ; "two sample window")]
    #[test_case(5 ; "default window")]
    #[test_case(8 ; "window longer than input")]
    fn should_equal_mean_of_last_n_values(window_size: usize) {
        let values = [71.0, 80.0, 95.5, 102.0, 99.0, 130.0, 88.0];
        let mut smoother = SampleSmoother::new(window_size);

        for (i, &value) in values.iter().enumerate() {
            let reading = smoother.ingest(Sample::now(value)).unwrap();

            let start = (i + 1).saturating_sub(window_size);
            let tail = &values[start..=i];
            let expected = tail.iter().sum::<f64>() / tail.len() as f64;

            assert!((reading.average - expected).abs() < 1e-9);
            assert_eq!(reading.sample_count, tail.len());
            assert!(reading.sample_count <= window_size);
        }
    }

    #[test]
    fn should_clamp_zero_window_to_one() {
        let mut smoother = SampleSmoother::new(0);

        let reading = feed(&mut smoother, &[50.0, 90.0]).unwrap();

        assert_eq!(smoother.window_size(), 1);
        assert_eq!(reading.average, 90.0);
    }

    #[test]
    fn should_ignore_non_finite_values() {
        let mut smoother = SampleSmoother::new(5);

        assert_eq!(smoother.ingest(Sample::now(f64::NAN)), None);

        smoother.ingest(Sample::now(80.0));
        let reading = smoother.ingest(Sample::now(f64::INFINITY)).unwrap();

        assert_eq!(reading.average, 80.0);
        assert_eq!(reading.sample_count, 1);
    }

    #[test]
    fn should_start_over_after_reset() {
        let mut smoother = SampleSmoother::new(5);
        feed(&mut smoother, &[100.0, 110.0]);

        smoother.reset();

        assert_eq!(smoother.current(), None);
        assert_eq!(smoother.ingest(Sample::now(60.0)).unwrap().average, 60.0);
    }
}
