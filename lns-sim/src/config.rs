use std::time::Duration;

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Configuration for the in-process cluster simulator.
///
/// All fields default to a perfect cluster: no failures, no latency.
#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    // ---
    /// Probability in `[0.0, 1.0]` that any resolver call fails.
    pub fail_probability: f64,

    /// Added to every call before it resolves.  `None` = immediate.
    pub latency: Option<Duration>,

    /// RNG seed for reproducible failure sequences. `None` = random.
    pub seed: Option<u64>,
}

// ---

impl SimConfig {
    // ---
    /// Perfect cluster — no impairments.
    pub fn perfect() -> Self {
        Self::default()
    }

    // ---

    /// Cluster whose calls fail with probability `fail_probability`, seeded
    /// so runs are reproducible.
    pub fn flaky(fail_probability: f64) -> Self {
        // ---
        Self {
            fail_probability,
            seed: Some(0x5EED_1DEA),
            ..Default::default()
        }
    }

    // ---

    /// Cluster that answers after `latency`.
    pub fn slow(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }
}
