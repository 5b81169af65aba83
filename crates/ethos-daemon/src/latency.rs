// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Microsecond latency histogram with fixed bucket bounds.
//!
//! Percentiles are read from bucket upper bounds, which is coarse but
//! allocation-free and monotone under load.

pub const BUCKET_BOUNDS_US: [u64; 12] = [
    10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 25_000, 50_000,
];

#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    counts: [u64; BUCKET_BOUNDS_US.len() + 1],
    total: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: [0; BUCKET_BOUNDS_US.len() + 1],
            total: 0,
        }
    }

    pub fn record(&mut self, latency_us: u64) {
        let index = BUCKET_BOUNDS_US
            .iter()
            .position(|bound| latency_us <= *bound)
            .unwrap_or(BUCKET_BOUNDS_US.len());
        self.counts[index] = self.counts[index].saturating_add(1);
        self.total = self.total.saturating_add(1);
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Upper bound of the bucket holding the p-th percentile sample.
    /// Returns 0 with no samples; the overflow bucket reports the largest
    /// bound.
    #[must_use]
    pub fn percentile_us(&self, p: f64) -> u64 {
        if self.total == 0 {
            return 0;
        }
        let threshold = ((self.total as f64) * p.clamp(0.0, 1.0)).ceil() as u64;
        let mut seen = 0_u64;
        for (i, count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= threshold.max(1) {
                return BUCKET_BOUNDS_US
                    .get(i)
                    .copied()
                    .unwrap_or(BUCKET_BOUNDS_US[BUCKET_BOUNDS_US.len() - 1]);
            }
        }
        BUCKET_BOUNDS_US[BUCKET_BOUNDS_US.len() - 1]
    }

    #[must_use]
    pub fn buckets(&self) -> impl Iterator<Item = (Option<u64>, u64)> + '_ {
        self.counts.iter().enumerate().map(|(i, count)| {
            (BUCKET_BOUNDS_US.get(i).copied(), *count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_reports_zero() {
        let h = LatencyHistogram::new();
        assert_eq!(h.percentile_us(0.5), 0);
        assert_eq!(h.total(), 0);
    }

    #[test]
    fn percentiles_track_bucket_bounds() {
        let mut h = LatencyHistogram::new();
        for _ in 0..90 {
            h.record(30); // 50us bucket
        }
        for _ in 0..10 {
            h.record(3_000); // 5ms bucket
        }
        assert_eq!(h.percentile_us(0.50), 50);
        assert_eq!(h.percentile_us(0.99), 5_000);
    }

    #[test]
    fn overflow_bucket_counts_slow_samples() {
        let mut h = LatencyHistogram::new();
        h.record(10_000_000);
        assert_eq!(h.total(), 1);
        assert_eq!(h.percentile_us(0.99), 50_000);
    }
}
