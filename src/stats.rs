//! Distributional latency statistics for completed load-test waves.

/// Summary statistics over one wave's latency samples, in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub median_ms: f64,
    pub stddev_ms: f64,
}

impl LatencySummary {
    /// Compute summary statistics from latency samples in seconds.
    ///
    /// Samples are converted to milliseconds before aggregation. The median
    /// averages the two middle values for even-length input. Standard
    /// deviation follows the sample-variance convention (divide by N-1);
    /// it is 0 for a single sample. Returns `None` for empty input.
    pub fn from_seconds(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut ms: Vec<f64> = samples.iter().map(|s| s * 1000.0).collect();
        ms.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = ms.len();
        let avg = ms.iter().sum::<f64>() / n as f64;
        let min = ms[0];
        let max = ms[n - 1];

        let mid = n / 2;
        let median = if n % 2 == 0 {
            (ms[mid - 1] + ms[mid]) / 2.0
        } else {
            ms[mid]
        };

        let stddev = if n > 1 {
            let sum_squares: f64 = ms.iter().map(|l| (l - avg) * (l - avg)).sum();
            (sum_squares / (n - 1) as f64).sqrt()
        } else {
            0.0
        };

        Some(LatencySummary {
            avg_ms: avg,
            min_ms: min,
            max_ms: max,
            median_ms: median,
            stddev_ms: stddev,
        })
    }

    /// All-zero summary, used for waves where every client failed.
    pub fn zeroed() -> Self {
        LatencySummary {
            avg_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            median_ms: 0.0,
            stddev_ms: 0.0,
        }
    }
}
