use chrono::{DateTime, Utc};

use crate::executor::OperationResult;
use crate::logger::{log_debug, LogTag};

/// Health thresholds used as a coarse circuit-breaker signal
const HEALTHY_MIN_SUCCESS_RATE: f64 = 80.0;
const HEALTHY_MAX_AVG_LATENCY_MS: f64 = 30_000.0;

/// Consistent point-in-time copy of the running statistics
#[derive(Debug, Clone)]
pub struct RunningMetrics {
    /// All submitted transactions, funding transfers included
    pub total_transactions: u64,
    pub successful_transactions: u64,
    pub failed_transactions: u64,
    /// Percentage in [0, 100]; 0 when nothing was recorded yet
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub total_volume_sol: f64,
    pub total_fees_sol: f64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

/// Accumulates counts, timings, volume and fees from completed operations
#[derive(Debug)]
pub struct MetricsAggregator {
    total: u64,
    successful: u64,
    failed: u64,
    total_latency_ms: u64,
    total_volume_sol: f64,
    total_fees_sol: f64,
    started_at: DateTime<Utc>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            total_latency_ms: 0,
            total_volume_sol: 0.0,
            total_fees_sol: 0.0,
            started_at: Utc::now(),
        }
    }

    /// Account one completed operation
    ///
    /// Counts every submitted transaction, funding transfers included;
    /// trade-only counters live on the session (total_buys/total_sells).
    pub fn record(&mut self, result: &OperationResult) {
        self.total += 1;
        if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.total_latency_ms += result.execution_time_ms;
        if let Some(volume) = result.volume_sol {
            self.total_volume_sol += volume;
        }
        if let Some(fee) = result.fee_sol {
            self.total_fees_sol += fee;
        }

        log_debug(
            LogTag::Metrics,
            "RECORDED",
            &format!(
                "total={} ok={} failed={} volume={:.6} SOL",
                self.total, self.successful, self.failed, self.total_volume_sol
            ),
        );
    }

    pub fn snapshot(&self) -> RunningMetrics {
        let success_rate = if self.total > 0 {
            (self.successful as f64 / self.total as f64) * 100.0
        } else {
            0.0
        };
        let average_latency_ms = if self.total > 0 {
            self.total_latency_ms as f64 / self.total as f64
        } else {
            0.0
        };

        RunningMetrics {
            total_transactions: self.total,
            successful_transactions: self.successful,
            failed_transactions: self.failed,
            success_rate,
            average_latency_ms,
            total_volume_sol: self.total_volume_sol,
            total_fees_sol: self.total_fees_sol,
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }

    /// Advisory health signal for external supervisors; the orchestrator
    /// does not consult this automatically.
    pub fn is_healthy(&self) -> bool {
        let snapshot = self.snapshot();
        snapshot.total_transactions > 0
            && snapshot.success_rate >= HEALTHY_MIN_SUCCESS_RATE
            && snapshot.average_latency_ms <= HEALTHY_MAX_AVG_LATENCY_MS
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(success: bool, latency_ms: u64, volume: Option<f64>) -> OperationResult {
        OperationResult {
            signature: if success { "sig".to_string() } else { String::new() },
            success,
            error: if success { None } else { Some("boom".to_string()) },
            execution_time_ms: latency_ms,
            volume_sol: volume,
            fee_sol: volume.map(|v| v * 0.001),
        }
    }

    #[test]
    fn counts_always_reconcile() {
        let mut metrics = MetricsAggregator::new();
        for i in 0..25 {
            metrics.record(&result(i % 3 != 0, 100, Some(0.01)));
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.total_transactions, 25);
        assert_eq!(
            snap.total_transactions,
            snap.successful_transactions + snap.failed_transactions
        );
    }

    #[test]
    fn empty_aggregator_reports_zero_rate_and_is_unhealthy() {
        let metrics = MetricsAggregator::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.success_rate, 0.0);
        assert_eq!(snap.average_latency_ms, 0.0);
        assert!(!metrics.is_healthy());
    }

    #[test]
    fn tracks_mean_latency_and_volume() {
        let mut metrics = MetricsAggregator::new();
        metrics.record(&result(true, 100, Some(0.5)));
        metrics.record(&result(true, 300, Some(0.25)));

        let snap = metrics.snapshot();
        assert_eq!(snap.average_latency_ms, 200.0);
        assert!((snap.total_volume_sol - 0.75).abs() < 1e-9);
        assert!(snap.total_fees_sol > 0.0);
    }

    #[test]
    fn healthy_requires_eighty_percent_success() {
        let mut metrics = MetricsAggregator::new();
        for _ in 0..8 {
            metrics.record(&result(true, 50, None));
        }
        metrics.record(&result(false, 50, None));
        metrics.record(&result(false, 50, None));
        // 8/10 = exactly 80%
        assert!(metrics.is_healthy());

        metrics.record(&result(false, 50, None));
        assert!(!metrics.is_healthy());
    }

    #[test]
    fn slow_operations_break_health() {
        let mut metrics = MetricsAggregator::new();
        metrics.record(&result(true, 45_000, None));
        assert!(!metrics.is_healthy());
    }
}
