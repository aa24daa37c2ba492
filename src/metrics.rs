use std::collections::BTreeMap;

/// Running per-epoch averages keyed by metric name.
///
/// Reset at the start of every epoch; `result` yields the aggregate log
/// returned by the trainer at epoch end.
#[derive(Debug, Default)]
pub struct MetricTracker {
    stats: BTreeMap<String, (f64, usize)>,
}

impl MetricTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the running mean for `name`.
    pub fn update(&mut self, name: &str, value: f64) {
        let entry = self.stats.entry(name.to_string()).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    /// Drop all accumulated statistics.
    pub fn reset(&mut self) {
        self.stats.clear();
    }

    /// Current mean for `name`, if any observation was recorded.
    pub fn mean(&self, name: &str) -> Option<f64> {
        self.stats
            .get(name)
            .map(|(sum, count)| sum / *count as f64)
    }

    /// Number of observations recorded for `name`.
    pub fn count(&self, name: &str) -> usize {
        self.stats.get(name).map(|(_, count)| *count).unwrap_or(0)
    }

    /// Snapshot of all means, ordered by metric name.
    pub fn result(&self) -> BTreeMap<String, f64> {
        self.stats
            .iter()
            .map(|(name, (sum, count))| (name.clone(), sum / *count as f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn running_mean_accumulates() {
        let mut metrics = MetricTracker::new();
        metrics.update("g_loss", 1.0);
        metrics.update("g_loss", 3.0);
        assert_relative_eq!(metrics.mean("g_loss").unwrap(), 2.0);
        assert_eq!(metrics.count("g_loss"), 2);
    }

    #[test]
    fn reset_clears_all_series() {
        let mut metrics = MetricTracker::new();
        metrics.update("d_loss", 0.5);
        metrics.reset();
        assert_eq!(metrics.count("d_loss"), 0);
        assert!(metrics.result().is_empty());
    }

    #[test]
    fn result_reports_every_series() {
        let mut metrics = MetricTracker::new();
        metrics.update("d_loss", 1.0);
        metrics.update("g_loss", 2.0);
        let log = metrics.result();
        assert_eq!(log.len(), 2);
        assert_relative_eq!(log["d_loss"], 1.0);
        assert_relative_eq!(log["g_loss"], 2.0);
    }
}
