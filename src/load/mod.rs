//! Coarse load tracking used to inform external throttling decisions.

use std::sync::Mutex;

use serde::Serialize;

/// Snapshot of load samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadMetrics {
    pub current_load: f64,
    pub peak_load: f64,
    pub average_load: f64,
}

#[derive(Debug, Default)]
struct LoadState {
    current: f64,
    peak: f64,
    sum: f64,
    samples: u64,
}

/// Tracks current, peak and average load
#[derive(Debug, Default)]
pub struct LoadMonitor {
    state: Mutex<LoadState>,
}

impl LoadMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a load sample. Non-finite samples are ignored.
    pub fn update_load(&self, value: f64) {
        if !value.is_finite() {
            tracing::debug!(value = %value, "Ignoring non-finite load sample");
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.current = value;
        if state.samples == 0 || value > state.peak {
            state.peak = value;
        }
        state.sum += value;
        state.samples += 1;
    }

    pub fn get_metrics(&self) -> LoadMetrics {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let average_load = if state.samples == 0 {
            0.0
        } else {
            state.sum / state.samples as f64
        };
        LoadMetrics {
            current_load: state.current,
            peak_load: state.peak,
            average_load,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_monitor() {
        let monitor = LoadMonitor::new();
        let metrics = monitor.get_metrics();
        assert_eq!(metrics.current_load, 0.0);
        assert_eq!(metrics.peak_load, 0.0);
        assert_eq!(metrics.average_load, 0.0);
    }

    #[test]
    fn test_tracks_current_peak_average() {
        let monitor = LoadMonitor::new();
        monitor.update_load(10.0);
        monitor.update_load(30.0);
        monitor.update_load(20.0);

        let metrics = monitor.get_metrics();
        assert_eq!(metrics.current_load, 20.0);
        assert_eq!(metrics.peak_load, 30.0);
        assert_eq!(metrics.average_load, 20.0);
    }

    #[test]
    fn test_ignores_nan() {
        let monitor = LoadMonitor::new();
        monitor.update_load(5.0);
        monitor.update_load(f64::NAN);

        let metrics = monitor.get_metrics();
        assert_eq!(metrics.current_load, 5.0);
        assert_eq!(metrics.average_load, 5.0);
    }
}
