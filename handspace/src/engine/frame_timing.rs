//! Frame processing instrumentation.
//!
//! Tracks how long the engine spends on each detector frame and how far
//! apart frames arrive, with rolling percentiles for IPC reporting.

/// Frame budget at the detector's nominal 30 Hz.
pub const DEFAULT_BUDGET_MS: f64 = 1000.0 / 30.0;

/// Rolling frame timing statistics over a window of samples.
#[derive(Debug)]
pub struct FrameTiming {
    /// Per-frame engine processing time.
    pub process_times: Vec<f64>,
    /// Time between consecutive frame timestamps.
    pub interval_times: Vec<f64>,
    /// Maximum number of samples to keep.
    pub window_size: usize,
    /// Total frames processed.
    pub total_frames: u64,
    /// Frames whose processing exceeded the budget.
    pub over_budget_frames: u64,
    /// Frame budget in milliseconds.
    pub budget_ms: f64,
    last_timestamp_ms: Option<u64>,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new(300, DEFAULT_BUDGET_MS)
    }
}

impl FrameTiming {
    pub fn new(window_size: usize, budget_ms: f64) -> Self {
        Self {
            process_times: Vec::with_capacity(window_size),
            interval_times: Vec::with_capacity(window_size),
            window_size,
            total_frames: 0,
            over_budget_frames: 0,
            budget_ms,
            last_timestamp_ms: None,
        }
    }

    /// Record one frame: its detector timestamp and the engine's
    /// processing time.
    pub fn record_frame(&mut self, timestamp_ms: u64, process_ms: f64) {
        Self::push_sample(&mut self.process_times, process_ms, self.window_size);
        if let Some(last) = self.last_timestamp_ms {
            // Out-of-order timestamps are skipped rather than counted as 0.
            if timestamp_ms > last {
                let interval = (timestamp_ms - last) as f64;
                Self::push_sample(&mut self.interval_times, interval, self.window_size);
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);

        self.total_frames += 1;
        if process_ms > self.budget_ms {
            self.over_budget_frames += 1;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.window_size, self.budget_ms);
    }

    fn push_sample(samples: &mut Vec<f64>, value: f64, window_size: usize) {
        samples.push(value);
        if samples.len() > window_size {
            samples.remove(0);
        }
    }

    /// Compute percentile from a sorted slice.
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() as f64 - 1.0) * p / 100.0).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn sorted(samples: &[f64]) -> Vec<f64> {
        let mut out = samples.to_vec();
        out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    pub fn stats(&self) -> FrameTimingStats {
        let process = Self::sorted(&self.process_times);
        let interval = Self::sorted(&self.interval_times);
        let interval_p50 = Self::percentile(&interval, 50.0);

        FrameTimingStats {
            process_p50: Self::percentile(&process, 50.0),
            process_p95: Self::percentile(&process, 95.0),
            process_p99: Self::percentile(&process, 99.0),
            interval_p50,
            interval_p99: Self::percentile(&interval, 99.0),
            fps: if interval_p50 > 0.0 {
                1000.0 / interval_p50
            } else {
                0.0
            },
            over_budget_pct: if self.total_frames > 0 {
                (self.over_budget_frames as f64 / self.total_frames as f64) * 100.0
            } else {
                0.0
            },
            total_frames: self.total_frames,
            over_budget_frames: self.over_budget_frames,
        }
    }

    /// Format stats as an s-expression for IPC.
    pub fn stats_sexp(&self) -> String {
        let s = self.stats();
        format!(
            "(:process-p50 {:.2} :process-p95 {:.2} :process-p99 {:.2} :interval-p50 {:.1} :interval-p99 {:.1} :fps {:.1} :over-budget-pct {:.1} :total-frames {} :over-budget-frames {} :budget-ms {:.1})",
            s.process_p50, s.process_p95, s.process_p99, s.interval_p50, s.interval_p99,
            s.fps, s.over_budget_pct, s.total_frames, s.over_budget_frames, self.budget_ms,
        )
    }
}

/// Computed frame timing statistics.
#[derive(Debug, Clone)]
pub struct FrameTimingStats {
    pub process_p50: f64,
    pub process_p95: f64,
    pub process_p99: f64,
    pub interval_p50: f64,
    pub interval_p99: f64,
    pub fps: f64,
    pub over_budget_pct: f64,
    pub total_frames: u64,
    pub over_budget_frames: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let ft = FrameTiming::default();
        let stats = ft.stats();
        assert_eq!(stats.total_frames, 0);
        assert_eq!(stats.fps, 0.0);
    }

    #[test]
    fn test_interval_drives_fps() {
        let mut ft = FrameTiming::default();
        for i in 0..10u64 {
            ft.record_frame(i * 40, 1.0);
        }
        let stats = ft.stats();
        assert_eq!(ft.interval_times.len(), 9);
        assert!((stats.interval_p50 - 40.0).abs() < 1e-9);
        assert!((stats.fps - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_over_budget_detection() {
        let mut ft = FrameTiming::new(100, DEFAULT_BUDGET_MS);
        ft.record_frame(0, 40.0);
        assert_eq!(ft.over_budget_frames, 1);
        ft.record_frame(33, 2.0);
        assert_eq!(ft.over_budget_frames, 1);
        assert_eq!(ft.total_frames, 2);
        assert!((ft.stats().over_budget_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_increasing_timestamp_skips_interval() {
        let mut ft = FrameTiming::default();
        ft.record_frame(100, 1.0);
        ft.record_frame(100, 1.0);
        ft.record_frame(50, 1.0);
        assert!(ft.interval_times.is_empty());
        assert_eq!(ft.total_frames, 3);
    }

    #[test]
    fn test_window_size_trim() {
        let mut ft = FrameTiming::new(5, DEFAULT_BUDGET_MS);
        for i in 0..10u64 {
            ft.record_frame(i * 33, i as f64);
        }
        assert_eq!(ft.process_times.len(), 5);
        assert_eq!(ft.total_frames, 10);
    }

    #[test]
    fn test_stats_sexp_format() {
        let mut ft = FrameTiming::default();
        ft.record_frame(0, 2.0);
        let sexp = ft.stats_sexp();
        assert!(sexp.starts_with("(:process-p50"));
        assert!(sexp.contains(":total-frames 1"));
        assert!(lexpr::from_str(&sexp).is_ok());
    }
}
