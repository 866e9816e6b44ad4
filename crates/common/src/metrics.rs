use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

/// Process-wide metrics registry for coordinator/engine instrumentation.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    queries_total: CounterVec,
    tasks_total: CounterVec,
    task_retries_total: CounterVec,
    inflight_tasks: GaugeVec,
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();
        let queries_total = CounterVec::new(
            Opts::new("msf_queries_total", "Queries by statement kind and status"),
            &["kind", "status"],
        )
        .expect("queries_total opts");
        let tasks_total = CounterVec::new(
            Opts::new("msf_tasks_total", "Map/reduce tasks by phase and status"),
            &["phase", "status"],
        )
        .expect("tasks_total opts");
        let task_retries_total = CounterVec::new(
            Opts::new("msf_task_retries_total", "Task retry attempts by phase"),
            &["phase"],
        )
        .expect("task_retries_total opts");
        let inflight_tasks = GaugeVec::new(
            Opts::new("msf_inflight_tasks", "Currently dispatched tasks by phase"),
            &["phase"],
        )
        .expect("inflight_tasks opts");

        registry
            .register(Box::new(queries_total.clone()))
            .expect("register queries_total");
        registry
            .register(Box::new(tasks_total.clone()))
            .expect("register tasks_total");
        registry
            .register(Box::new(task_retries_total.clone()))
            .expect("register task_retries_total");
        registry
            .register(Box::new(inflight_tasks.clone()))
            .expect("register inflight_tasks");

        Self {
            registry,
            queries_total,
            tasks_total,
            task_retries_total,
            inflight_tasks,
        }
    }
}

impl MetricsRegistry {
    /// Create an isolated registry (tests); production code uses
    /// [`global_metrics`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Count one finished query.
    pub fn inc_query(&self, kind: &str, status: &str) {
        self.inner
            .queries_total
            .with_label_values(&[kind, status])
            .inc();
    }

    /// Count one finished task attempt.
    pub fn inc_task(&self, phase: &str, status: &str) {
        self.inner
            .tasks_total
            .with_label_values(&[phase, status])
            .inc();
    }

    /// Count one retry of a task.
    pub fn inc_retry(&self, phase: &str) {
        self.inner
            .task_retries_total
            .with_label_values(&[phase])
            .inc();
    }

    /// Track a task entering dispatch.
    pub fn inc_inflight(&self, phase: &str) {
        self.inner.inflight_tasks.with_label_values(&[phase]).inc();
    }

    /// Track a task leaving dispatch.
    pub fn dec_inflight(&self, phase: &str) {
        self.inner.inflight_tasks.with_label_values(&[phase]).dec();
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.inner.registry.gather(), &mut buf)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<MetricsRegistry> = OnceLock::new();

/// Process-wide registry shared by engine and binaries.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL.get_or_init(MetricsRegistry::new)
}
