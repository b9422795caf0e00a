//! Standard inference-experiment catalog

use super::{Cardinality, LabelDomain, MetricDefinition};

fn metric(
    key: &str,
    query: &str,
    domain: LabelDomain,
    unit: &str,
    cardinality: Cardinality,
) -> MetricDefinition {
    MetricDefinition::new(key, query, domain, unit, cardinality)
}

/// Definitions in artifact order.
pub(super) fn definitions() -> Vec<MetricDefinition> {
    use Cardinality::{PerReplica, Single};
    use LabelDomain::{Container, Device, Node, Workload};

    vec![
        // cAdvisor, per pod
        metric(
            "cpu_usage",
            r#"rate(container_cpu_usage_seconds_total{pod=~"{workload}-inference.*",container="{workload}"}[1m])"#,
            Container,
            "cores",
            PerReplica,
        ),
        metric(
            "memory_usage",
            r#"container_memory_working_set_bytes{pod=~"{workload}-inference.*",container="{workload}"}"#,
            Container,
            "bytes",
            PerReplica,
        ),
        // DCGM exporter, shared device under time-slicing
        metric(
            "gpu_utilization",
            r#"DCGM_FI_DEV_GPU_UTIL{gpu="0"}"#,
            Device,
            "percent",
            Single,
        ),
        metric(
            "gpu_memory",
            r#"DCGM_FI_DEV_FB_USED{gpu="0"}"#,
            Device,
            "mebibytes",
            Single,
        ),
        metric(
            "gpu_power",
            r#"DCGM_FI_DEV_POWER_USAGE{gpu="0"}"#,
            Device,
            "watts",
            Single,
        ),
        metric(
            "gpu_temperature",
            r#"DCGM_FI_DEV_GPU_TEMP{gpu="0"}"#,
            Device,
            "celsius",
            Single,
        ),
        // PSI, requires cgroup v2; legitimately all-zero on some nodes
        metric(
            "cpu_psi",
            r#"rate(container_pressure_cpu_waiting_seconds_total{pod=~"{workload}-inference.*",container="{workload}"}[1m])"#,
            Node,
            "seconds_per_second",
            PerReplica,
        ),
        metric(
            "memory_psi",
            r#"rate(container_pressure_memory_waiting_seconds_total{pod=~"{workload}-inference.*",container="{workload}"}[1m])"#,
            Node,
            "seconds_per_second",
            PerReplica,
        ),
        metric(
            "io_psi",
            r#"rate(container_pressure_io_waiting_seconds_total{pod=~"{workload}-inference.*",container="{workload}"}[1m])"#,
            Node,
            "seconds_per_second",
            PerReplica,
        ),
        // Application instrumentation
        metric(
            "inference_latency_avg",
            "rate({workload}_inference_latency_seconds_sum[1m]) / rate({workload}_inference_latency_seconds_count[1m])",
            Workload,
            "seconds",
            PerReplica,
        ),
        metric(
            "inference_latency_p50",
            "histogram_quantile(0.50, sum by (le) (rate({workload}_inference_latency_seconds_bucket[1m])))",
            Workload,
            "seconds",
            Single,
        ),
        metric(
            "inference_latency_p95",
            "histogram_quantile(0.95, sum by (le) (rate({workload}_inference_latency_seconds_bucket[1m])))",
            Workload,
            "seconds",
            Single,
        ),
        metric(
            "inference_latency_p99",
            "histogram_quantile(0.99, sum by (le) (rate({workload}_inference_latency_seconds_bucket[1m])))",
            Workload,
            "seconds",
            Single,
        ),
        metric(
            "inference_throughput",
            "sum(rate({workload}_inference_total[1m]))",
            Workload,
            "requests_per_second",
            Single,
        ),
        // Rate, not the raw counter, so it lines up with throughput
        metric(
            "inference_total",
            "sum(rate({workload}_inference_total[1m]))",
            Workload,
            "requests_per_second",
            Single,
        ),
    ]
}
