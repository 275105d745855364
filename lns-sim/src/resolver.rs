use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

// ---

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ---

use lns_domain::{
    // ---
    DevAddr,
    DeviceDirectoryRecord,
    Eui64,
    LnsError,
    NetworkServerService,
    PreferredGatewayResult,
    Result,
    SearchDevicesResult,
    UplinkClaim,
};

// ---

use super::SimConfig;

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Winner bookkeeping for one device.
#[derive(Debug, Clone)]
struct ClaimState {
    // ---
    /// Highest uplink counter any gateway has claimed.
    current_fcnt_up: u32,

    /// Gateway that claimed `current_fcnt_up` first.
    preferred_gateway_id: String,
}

#[derive(Default)]
struct Cluster {
    // ---
    directory: HashMap<DevAddr, Vec<DeviceDirectoryRecord>>,
    claims: HashMap<Eui64, ClaimState>,
    fcnt_down: HashMap<Eui64, u32>,
}

// ---------------------------------------------------------------------------
// SimResolver
// ---------------------------------------------------------------------------

/// In-process stand-in for the clustered resolver and device directory.
///
/// Claim semantics: the first gateway to claim a counter higher than any
/// seen before becomes preferred for it.  A different gateway claiming the
/// same counter gets `Conflict = true` naming the first one.  A claim below
/// the current counter is stale and also reported as a conflict.
pub struct SimResolver {
    // ---
    config: SimConfig,
    cluster: Mutex<Cluster>,
    rng: Mutex<StdRng>,

    /// Every call fails while set.
    outage: AtomicBool,

    claims_seen: AtomicUsize,
    fcnt_down_calls: AtomicUsize,
    searches: AtomicUsize,
}

// ---

impl SimResolver {
    // ---
    pub fn new(config: SimConfig) -> Self {
        // ---
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            cluster: Mutex::new(Cluster::default()),
            rng: Mutex::new(rng),
            outage: AtomicBool::new(false),
            claims_seen: AtomicUsize::new(0),
            fcnt_down_calls: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
        }
    }

    // ---

    /// Add a record to the simulated device directory.
    pub fn add_device(&self, record: DeviceDirectoryRecord) {
        // ---
        let mut cluster = self.lock();
        cluster
            .directory
            .entry(record.dev_addr)
            .or_default()
            .push(record);
    }

    // ---

    /// Start or end a hard outage.
    pub fn set_outage(&self, down: bool) {
        // ---
        tracing::debug!(down, "sim resolver outage toggled");
        self.outage.store(down, Ordering::SeqCst);
    }

    // ---

    /// Number of claims that reached the resolver (failed ones excluded).
    pub fn claims_seen(&self) -> usize {
        self.claims_seen.load(Ordering::SeqCst)
    }

    pub fn fcnt_down_calls(&self) -> usize {
        self.fcnt_down_calls.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Last downlink counter handed out for `dev_eui`.
    pub fn fcnt_down(&self, dev_eui: Eui64) -> Option<u32> {
        self.lock().fcnt_down.get(&dev_eui).copied()
    }

    // ---

    fn lock(&self) -> std::sync::MutexGuard<'_, Cluster> {
        // A panic while holding the lock only happens in a failing test.
        self.cluster.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---

    /// Apply latency and failure injection.  `Err` means this call fails.
    async fn impair(&self, call: &'static str) -> Result<()> {
        // ---
        if let Some(latency) = self.config.latency {
            tokio::time::sleep(latency).await;
        }

        if self.outage.load(Ordering::SeqCst) {
            return Err(LnsError::Resolver(format!("{call}: cluster unavailable")));
        }

        if self.config.fail_probability > 0.0 {
            let p = self.config.fail_probability.clamp(0.0, 1.0);
            let fail = self
                .rng
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .gen_bool(p);
            if fail {
                return Err(LnsError::Resolver(format!("{call}: injected failure")));
            }
        }

        Ok(())
    }
}

// ---

#[async_trait]
impl NetworkServerService for SimResolver {
    // ---
    async fn next_fcnt_down(
        &self,
        dev_eui: Eui64,
        fcnt_down: u32,
        _fcnt_up: u32,
        _gateway_id: &str,
    ) -> Result<u32> {
        // ---
        self.impair("next_fcnt_down").await?;
        self.fcnt_down_calls.fetch_add(1, Ordering::SeqCst);

        let mut cluster = self.lock();
        let stored = cluster.fcnt_down.entry(dev_eui).or_insert(0);
        let next = (*stored).max(fcnt_down).wrapping_add(1);
        *stored = next;
        Ok(next)
    }

    // ---

    async fn resolve_preferred_gateway(&self, claim: &UplinkClaim) -> Result<PreferredGatewayResult> {
        // ---
        self.impair("resolve_preferred_gateway").await?;
        self.claims_seen.fetch_add(1, Ordering::SeqCst);

        let mut cluster = self.lock();
        let state = cluster.claims.get(&claim.dev_eui).cloned();

        let result = match state {
            Some(s) if claim.fcnt_up < s.current_fcnt_up => PreferredGatewayResult {
                request_fcnt_up: claim.fcnt_up,
                preferred_gateway_id: Some(s.preferred_gateway_id),
                conflict: true,
                current_fcnt_up: s.current_fcnt_up,
                error_message: Some(format!(
                    "stale frame counter {} (current {})",
                    claim.fcnt_up, s.current_fcnt_up
                )),
            },

            Some(s) if claim.fcnt_up == s.current_fcnt_up => PreferredGatewayResult {
                request_fcnt_up: claim.fcnt_up,
                conflict: !s.preferred_gateway_id.eq_ignore_ascii_case(&claim.gateway_id),
                preferred_gateway_id: Some(s.preferred_gateway_id),
                current_fcnt_up: s.current_fcnt_up,
                error_message: None,
            },

            _ => {
                cluster.claims.insert(
                    claim.dev_eui,
                    ClaimState {
                        current_fcnt_up: claim.fcnt_up,
                        preferred_gateway_id: claim.gateway_id.clone(),
                    },
                );
                PreferredGatewayResult {
                    request_fcnt_up: claim.fcnt_up,
                    preferred_gateway_id: Some(claim.gateway_id.clone()),
                    conflict: false,
                    current_fcnt_up: claim.fcnt_up,
                    error_message: None,
                }
            }
        };

        tracing::trace!(
            dev_eui = %claim.dev_eui,
            fcnt_up = claim.fcnt_up,
            gateway_id = %claim.gateway_id,
            conflict = result.conflict,
            "sim resolver verdict",
        );
        Ok(result)
    }

    // ---

    async fn search_devices(&self, dev_addr: DevAddr) -> Result<SearchDevicesResult> {
        // ---
        self.impair("search_devices").await?;
        self.searches.fetch_add(1, Ordering::SeqCst);

        let cluster = self.lock();
        Ok(SearchDevicesResult::new(cluster.directory.get(&dev_addr).cloned()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
