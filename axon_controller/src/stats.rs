//! Rolling windowed statistics.
//!
//! Fixed-capacity ring buffer over the most recent measurements. Used for
//! per-controller execution time and update periodicity, and by the manager
//! for cycle periodicity. O(window) summaries are computed on demand by the
//! (non-realtime) diagnostics reader; the realtime writer only pushes.

/// Summary of the current window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSummary {
    /// Samples currently in the window.
    pub count: usize,
    /// Window mean.
    pub mean: f64,
    /// Window minimum.
    pub min: f64,
    /// Window maximum.
    pub max: f64,
    /// Window standard deviation.
    pub std_dev: f64,
}

/// Ring buffer of the most recent `capacity` samples.
#[derive(Debug, Clone)]
pub struct RollingStats {
    samples: Vec<f64>,
    capacity: usize,
    next: usize,
    filled: bool,
}

impl RollingStats {
    /// Create a window of `capacity` samples. Capacity is allocated up
    /// front so pushes never allocate.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "stats window capacity must be non-zero");
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            filled: false,
        }
    }

    /// Record one measurement.
    pub fn record(&mut self, value: f64) {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            self.samples[self.next] = value;
            self.filled = true;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Discard all samples (called when a controller re-activates).
    pub fn reset(&mut self) {
        self.samples.clear();
        self.next = 0;
        self.filled = false;
    }

    /// Samples currently in the window.
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Summarize the window; `None` when empty.
    pub fn summary(&self) -> Option<StatsSummary> {
        if self.samples.is_empty() {
            return None;
        }
        let count = self.samples.len();
        let mean = self.samples.iter().sum::<f64>() / count as f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum_sq = 0.0;
        for &sample in &self.samples {
            min = min.min(sample);
            max = max.max(sample);
            let diff = sample - mean;
            sum_sq += diff * diff;
        }
        let std_dev = (sum_sq / count as f64).sqrt();
        Some(StatsSummary {
            count,
            mean,
            min,
            max,
            std_dev,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
