//! Metric definitions and in-process instruments.
//!
//! Each instrument is bound to a [`MetricDefinition`] at construction and
//! refuses a definition of the wrong kind.  Values live in atomics; getting
//! them out of the process is an exporter's job, not this module's.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// ---

use lns_domain::{LnsError, Result};

// ---------------------------------------------------------------------------
// MetricKind / MetricDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    // ---
    Counter,
    Histogram,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDefinition {
    // ---
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
}

// ---

pub const UPLINKS_RECEIVED: MetricDefinition = MetricDefinition {
    name: "uplinks_received",
    kind: MetricKind::Counter,
    description: "Uplinks accepted from the ingress",
};

pub const DUPLICATES_DROPPED: MetricDefinition = MetricDefinition {
    name: "duplicates_dropped",
    kind: MetricKind::Counter,
    description: "Uplinks dropped as duplicates or replays",
};

pub const RESOLVER_FAILURES: MetricDefinition = MetricDefinition {
    name: "resolver_failures",
    kind: MetricKind::Counter,
    description: "Failed calls to the preferred-gateway resolver",
};

pub const DOWNLINKS_SCHEDULED: MetricDefinition = MetricDefinition {
    name: "downlinks_scheduled",
    kind: MetricKind::Counter,
    description: "Downlinks handed to the radio layer",
};

pub const PROCESSING_DELAY_WAIT: MetricDefinition = MetricDefinition {
    name: "processing_delay_wait_ms",
    kind: MetricKind::Histogram,
    description: "Time spent waiting out the processing delay, in milliseconds",
};

// ---

fn check_kind(def: &MetricDefinition, expected: MetricKind) -> Result<()> {
    // ---
    if def.kind == expected {
        return Ok(());
    }
    Err(LnsError::MetricKindMismatch {
        name: def.name.to_owned(),
        expected: expected.as_str(),
        actual: def.kind.as_str(),
    })
}

// ---------------------------------------------------------------------------
// Counter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Counter {
    // ---
    definition: MetricDefinition,
    value: AtomicU64,
}

impl Counter {
    // ---
    pub fn new(definition: &MetricDefinition) -> Result<Self> {
        // ---
        check_kind(definition, MetricKind::Counter)?;
        Ok(Self {
            definition: *definition,
            value: AtomicU64::new(0),
        })
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn definition(&self) -> &MetricDefinition {
        &self.definition
    }
}

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Upper bounds (inclusive, milliseconds) of the histogram buckets.  Values
/// above the last bound land in the overflow bucket.
const BUCKET_BOUNDS_MS: [u64; 7] = [10, 50, 100, 200, 400, 800, 1600];

#[derive(Debug)]
pub struct Histogram {
    // ---
    definition: MetricDefinition,
    buckets: [AtomicU64; BUCKET_BOUNDS_MS.len() + 1],
    count: AtomicU64,
    sum_ms: AtomicU64,
}

impl Histogram {
    // ---
    pub fn new(definition: &MetricDefinition) -> Result<Self> {
        // ---
        check_kind(definition, MetricKind::Histogram)?;
        Ok(Self {
            definition: *definition,
            buckets: Default::default(),
            count: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
        })
    }

    // ---

    pub fn record(&self, value: Duration) {
        // ---
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        let idx = BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_ms(&self) -> u64 {
        self.sum_ms.load(Ordering::Relaxed)
    }

    /// Per-bucket counts, overflow bucket last.
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    pub fn definition(&self) -> &MetricDefinition {
        &self.definition
    }
}

// ---------------------------------------------------------------------------
// ServerMetrics
// ---------------------------------------------------------------------------

/// The instruments the uplink pipeline updates.
#[derive(Debug)]
pub struct ServerMetrics {
    // ---
    pub uplinks_received: Counter,
    pub duplicates_dropped: Counter,
    pub resolver_failures: Counter,
    pub downlinks_scheduled: Counter,
    pub processing_delay_wait: Histogram,
}

impl ServerMetrics {
    // ---
    pub fn new() -> Result<Self> {
        // ---
        Ok(Self {
            uplinks_received: Counter::new(&UPLINKS_RECEIVED)?,
            duplicates_dropped: Counter::new(&DUPLICATES_DROPPED)?,
            resolver_failures: Counter::new(&RESOLVER_FAILURES)?,
            downlinks_scheduled: Counter::new(&DOWNLINKS_SCHEDULED)?,
            processing_delay_wait: Histogram::new(&PROCESSING_DELAY_WAIT)?,
        })
    }

    // ---

    /// One summary line, logged at shutdown.
    pub fn log_summary(&self) {
        tracing::info!(
            uplinks = self.uplinks_received.get(),
            duplicates = self.duplicates_dropped.get(),
            resolver_failures = self.resolver_failures.get(),
            downlinks = self.downlinks_scheduled.get(),
            delay_waits = self.processing_delay_wait.count(),
            "metrics summary",
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
