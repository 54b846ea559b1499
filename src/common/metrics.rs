//! Metrics primitives and Prometheus text rendering
//!
//! Cache groups and the node keep lock-free counters; the `/metrics`
//! endpoint renders them in the Prometheus exposition format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// Builder for Prometheus exposition text
#[derive(Debug, Default)]
pub struct PrometheusText {
    out: String,
}

impl PrometheusText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write HELP/TYPE headers followed by one sample per label set
    pub fn metric(
        &mut self,
        name: &str,
        help: &str,
        kind: MetricKind,
        samples: &[(Vec<(&str, &str)>, u64)],
    ) -> &mut Self {
        // Writing to a String cannot fail
        let _ = writeln!(self.out, "# HELP meshcache_{} {}", name, help);
        let _ = writeln!(self.out, "# TYPE meshcache_{} {}", name, kind.as_str());
        for (labels, value) in samples {
            if labels.is_empty() {
                let _ = writeln!(self.out, "meshcache_{} {}", name, value);
            } else {
                let rendered: Vec<String> = labels
                    .iter()
                    .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
                    .collect();
                let _ = writeln!(
                    self.out,
                    "meshcache_{}{{{}}} {}",
                    name,
                    rendered.join(","),
                    value
                );
            }
        }
        self
    }

    pub fn finish(self) -> String {
        self.out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
