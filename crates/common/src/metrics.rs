use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

/// Process-wide metrics registry for dispatch and replica-control activity.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    jobs_started: CounterVec,
    jobs_retried: CounterVec,
    jobs_completed: CounterVec,
    jobs_cancelled: CounterVec,
    result_bytes_merged: CounterVec,
    jobs_inflight: GaugeVec,
    replica_requests_inflight: GaugeVec,
    replica_requests_finished: CounterVec,
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();
        let jobs_started = CounterVec::new(
            Opts::new("sks_jobs_started_total", "Job attempts started"),
            &["query_id"],
        )
        .expect("metric opts");
        let jobs_retried = CounterVec::new(
            Opts::new("sks_jobs_retried_total", "Job attempts retried"),
            &["query_id"],
        )
        .expect("metric opts");
        let jobs_completed = CounterVec::new(
            Opts::new("sks_jobs_completed_total", "Jobs reaching a terminal state"),
            &["query_id", "outcome"],
        )
        .expect("metric opts");
        let jobs_cancelled = CounterVec::new(
            Opts::new("sks_jobs_cancelled_total", "Jobs cancelled by squash"),
            &["query_id"],
        )
        .expect("metric opts");
        let result_bytes_merged = CounterVec::new(
            Opts::new("sks_result_bytes_merged_total", "Result bytes accepted by the merger"),
            &["query_id"],
        )
        .expect("metric opts");
        let jobs_inflight = GaugeVec::new(
            Opts::new("sks_jobs_inflight", "Jobs not yet terminal"),
            &["query_id"],
        )
        .expect("metric opts");
        let replica_requests_inflight = GaugeVec::new(
            Opts::new("sks_replica_requests_inflight", "Replica requests in the registry"),
            &["kind"],
        )
        .expect("metric opts");
        let replica_requests_finished = CounterVec::new(
            Opts::new("sks_replica_requests_finished_total", "Replica requests finished"),
            &["kind", "state"],
        )
        .expect("metric opts");

        registry
            .register(Box::new(jobs_started.clone()))
            .expect("register metric");
        registry
            .register(Box::new(jobs_retried.clone()))
            .expect("register metric");
        registry
            .register(Box::new(jobs_completed.clone()))
            .expect("register metric");
        registry
            .register(Box::new(jobs_cancelled.clone()))
            .expect("register metric");
        registry
            .register(Box::new(result_bytes_merged.clone()))
            .expect("register metric");
        registry
            .register(Box::new(jobs_inflight.clone()))
            .expect("register metric");
        registry
            .register(Box::new(replica_requests_inflight.clone()))
            .expect("register metric");
        registry
            .register(Box::new(replica_requests_finished.clone()))
            .expect("register metric");

        Self {
            registry,
            jobs_started,
            jobs_retried,
            jobs_completed,
            jobs_cancelled,
            result_bytes_merged,
            jobs_inflight,
            replica_requests_inflight,
            replica_requests_finished,
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create a standalone registry (tests use this to avoid global state).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Record one started job attempt.
    pub fn record_job_started(&self, query_id: &str) {
        self.inner.jobs_started.with_label_values(&[query_id]).inc();
    }

    /// Record one retried job attempt.
    pub fn record_job_retried(&self, query_id: &str) {
        self.inner.jobs_retried.with_label_values(&[query_id]).inc();
    }

    /// Record one terminal job with its outcome label (`success`/`failure`).
    pub fn record_job_completed(&self, query_id: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner
            .jobs_completed
            .with_label_values(&[query_id, outcome])
            .inc();
    }

    /// Record one cancelled job.
    pub fn record_job_cancelled(&self, query_id: &str) {
        self.inner
            .jobs_cancelled
            .with_label_values(&[query_id])
            .inc();
    }

    /// Record bytes accepted by the result merger.
    pub fn record_merged_bytes(&self, query_id: &str, bytes: u64) {
        self.inner
            .result_bytes_merged
            .with_label_values(&[query_id])
            .inc_by(bytes as f64);
    }

    /// Set the current in-flight job gauge for one query.
    pub fn set_jobs_inflight(&self, query_id: &str, count: i64) {
        self.inner
            .jobs_inflight
            .with_label_values(&[query_id])
            .set(count as f64);
    }

    /// Adjust the replica-request in-flight gauge for one request kind.
    pub fn add_replica_inflight(&self, kind: &str, delta: i64) {
        self.inner
            .replica_requests_inflight
            .with_label_values(&[kind])
            .add(delta as f64);
    }

    /// Record one finished replica request with its terminal state label.
    pub fn record_replica_finished(&self, kind: &str, state: &str) {
        self.inner
            .replica_requests_finished
            .with_label_values(&[kind, state])
            .inc();
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render_text(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&metric_families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// Access the process-global metrics registry.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_counters() {
        let m = MetricsRegistry::new();
        m.record_job_started("1");
        m.record_job_completed("1", true);
        m.set_jobs_inflight("1", 3);
        let text = m.render_text();
        assert!(text.contains("sks_jobs_started_total"));
        assert!(text.contains("sks_jobs_inflight"));
    }
}
