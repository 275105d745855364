//! [`ConnectionRegistry`] — one live session per device.
//!
//! # Ownership
//!
//! Each entry owns the device's [`DeviceSession`] (behind an async mutex,
//! so exactly one uplink at a time can hold it) and the upstream
//! [`DeviceConnection`](lns_domain::DeviceConnection) bound to it.
//!
//! # Removal paths
//!
//! An entry leaves the registry in one of three ways, and every path ends in
//! the same eviction routine, which releases the connection:
//!
//! ```text
//! release(identity) ──┐
//! sweep_idle(now)   ──┼──► on_evicted ──► connection.release()
//! dispose()         ──┘
//! ```
//!
//! `dispose` additionally releases every connection explicitly before
//! evicting, so a disposed connection sees `release` twice.  Connections are
//! required to tolerate that; the registry does not deduplicate.
//!
//! # Concurrency
//!
//! `register` uses the map's entry API, so check-then-insert is atomic per
//! identity.  Sweep removals go through `remove_if`, re-checking idleness
//! under the shard lock, so a sweep racing an explicit `release` removes the
//! entry at most once.

use std::sync::Arc;
use std::time::Duration;

// ---

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

// ---

use lns_domain::{DevAddr, DeviceConnectionPtr, DeviceIdentity, LnsError, Result};

// ---------------------------------------------------------------------------
// DeviceSession
// ---------------------------------------------------------------------------

/// Mutable per-device state, guarded by the registry entry's mutex.
pub struct DeviceSession {
    // ---
    pub identity: DeviceIdentity,

    /// Last accepted uplink counter.
    pub fcnt_up: u32,

    /// Last downlink counter handed out.
    pub fcnt_down: u32,

    /// Gateway the device is pinned to.  `None` = any gateway.
    pub gateway_id: Option<String>,

    pub connection: DeviceConnectionPtr,

    /// Uplinks accepted on this session so far.
    pub uplinks_seen: u64,
}

// ---

impl DeviceSession {
    // ---
    pub fn new(
        identity: DeviceIdentity,
        gateway_id: Option<String>,
        connection: DeviceConnectionPtr,
    ) -> Self {
        // ---
        Self {
            identity,
            fcnt_up: 0,
            fcnt_down: 0,
            gateway_id: gateway_id.filter(|g| !g.is_empty()),
            connection,
            uplinks_seen: 0,
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("identity", &self.identity)
            .field("fcnt_up", &self.fcnt_up)
            .field("fcnt_down", &self.fcnt_down)
            .field("gateway_id", &self.gateway_id)
            .field("uplinks_seen", &self.uplinks_seen)
            .finish()
    }
}

// ---

/// Shared handle to a registered session.
pub type DeviceSessionPtr = Arc<Mutex<DeviceSession>>;

// ---------------------------------------------------------------------------
// RegistryEntry
// ---------------------------------------------------------------------------

struct RegistryEntry {
    // ---
    session: DeviceSessionPtr,

    /// Copy of the session's connection, reachable without taking the
    /// session lock.
    connection: DeviceConnectionPtr,

    last_used: Instant,
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

pub struct ConnectionRegistry {
    // ---
    entries: DashMap<DeviceIdentity, RegistryEntry>,

    /// Entries unused for longer than this are evicted by the sweep.
    idle_ttl: Duration,
}

// ---

impl ConnectionRegistry {
    // ---
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ---

    /// Insert `session` under its identity.
    ///
    /// Fails with [`LnsError::Conflict`] when a live entry exists; the
    /// existing entry is left untouched and the caller still owns
    /// `session`'s connection.
    pub fn register(&self, session: DeviceSession) -> Result<DeviceSessionPtr> {
        // ---
        let identity = session.identity;

        match self.entries.entry(identity) {
            Entry::Occupied(_) => {
                tracing::debug!(%identity, "register rejected: session already live");
                Err(LnsError::Conflict(identity))
            }
            Entry::Vacant(slot) => {
                let connection = session.connection.clone();
                let session = Arc::new(Mutex::new(session));
                slot.insert(RegistryEntry {
                    session: session.clone(),
                    connection,
                    last_used: Instant::now(),
                });
                tracing::debug!(%identity, "session registered");
                Ok(session)
            }
        }
    }

    // ---

    /// Session for `identity`, refreshing its last-used instant.  Never
    /// waits on the session lock.
    pub fn lookup(&self, identity: DeviceIdentity) -> Option<DeviceSessionPtr> {
        // ---
        let mut entry = self.entries.get_mut(&identity)?;
        entry.last_used = Instant::now();
        Some(entry.session.clone())
    }

    // ---

    /// Every live session whose identity carries `dev_addr`.
    pub fn find_by_dev_addr(&self, dev_addr: DevAddr) -> Vec<(DeviceIdentity, DeviceSessionPtr)> {
        // ---
        self.entries
            .iter()
            .filter(|e| e.key().dev_addr == dev_addr)
            .map(|e| (*e.key(), e.session.clone()))
            .collect()
    }

    // ---

    /// Remove the entry for `identity`.  Returns `false` if there was none.
    pub fn release(&self, identity: DeviceIdentity) -> bool {
        // ---
        match self.entries.remove(&identity) {
            Some((identity, entry)) => {
                Self::on_evicted(identity, entry, "released");
                true
            }
            None => false,
        }
    }

    // ---

    /// Tear the registry down.  Every connection is released explicitly and
    /// then once more by the eviction routine.
    pub fn dispose(&self) {
        // ---
        let connections: Vec<DeviceConnectionPtr> = self
            .entries
            .iter()
            .map(|e| e.connection.clone())
            .collect();

        tracing::info!(sessions = connections.len(), "disposing connection registry");

        for connection in &connections {
            connection.release();
        }

        let identities: Vec<DeviceIdentity> = self.entries.iter().map(|e| *e.key()).collect();
        for identity in identities {
            if let Some((identity, entry)) = self.entries.remove(&identity) {
                Self::on_evicted(identity, entry, "disposed");
            }
        }
    }

    // ---

    /// Evict entries idle for longer than the TTL as of `now`.  Entries whose
    /// session is held by an uplink in flight are skipped this round.
    ///
    /// Returns the number of entries evicted.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        // ---
        let ttl = self.idle_ttl;
        let is_idle = |entry: &RegistryEntry| {
            now.saturating_duration_since(entry.last_used) > ttl && entry.session.try_lock().is_ok()
        };

        let candidates: Vec<DeviceIdentity> = self
            .entries
            .iter()
            .filter(|e| is_idle(e.value()))
            .map(|e| *e.key())
            .collect();

        let mut evicted = 0;
        for identity in candidates {
            // Re-checked under the shard lock: a lookup or release may have
            // run since the scan.
            if let Some((identity, entry)) = self.entries.remove_if(&identity, |_, e| is_idle(e)) {
                Self::on_evicted(identity, entry, "idle");
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.entries.len(), "idle sweep");
        }
        evicted
    }

    // ---

    /// Run [`sweep_idle`](Self::sweep_idle) every `interval` until
    /// `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        // ---
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_idle(Instant::now());
                    }
                }
            }
            tracing::debug!("idle sweeper stopped");
        })
    }

    // ---

    fn on_evicted(identity: DeviceIdentity, entry: RegistryEntry, cause: &'static str) {
        // ---
        tracing::debug!(%identity, cause, "session evicted");
        entry.connection.release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
