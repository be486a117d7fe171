//! # Least-Connections Balancer
//!
//! The selection engine: a registry of [`ServerHandle`]s plus the policy that
//! routes each new unit of work to the server with the fewest active
//! connections.
//!
//! ## Concurrency discipline
//!
//! The registry is a `BTreeMap` behind a `parking_lot::RwLock`; each handle's
//! connection counter is an atomic. `acquire` runs optimistically: it scans
//! under the read lock, picks the minimum, then commits with a
//! compare-and-increment that re-validates the chosen count. A conflict
//! (another caller raced the same slot) triggers a rescan; after a bounded
//! number of conflicts `acquire` takes the write lock, which excludes every
//! other selection and makes scan+increment trivially atomic. Either way the
//! whole operation is linearizable: its commit point is the successful
//! counter update, and no two concurrent acquires can both take the same
//! momentarily-least-loaded slot.
//!
//! ## Tie-breaking
//!
//! Among servers tied at the minimum count, the lexicographically smallest id
//! wins. The scan walks the `BTreeMap` in key order and only replaces its
//! candidate on a strictly smaller count, so the rule costs nothing and is
//! stable across calls for a fixed server set.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::core::config::{BalancerConfig, DEFAULT_MAX_SELECT_RETRIES};
use crate::core::error::{BalancerError, BalancerResult};
use crate::load_balancing::handle::{ServerHandle, ServerRef};
use crate::load_balancing::stats::{BalancerStats, ServerStats};

/// Least-connections load balancer
///
/// Owns every [`ServerHandle`] it hands out work for. Callers interact
/// through ids and [`ServerRef`] tokens only; the handles themselves never
/// leave the registry.
#[derive(Debug)]
pub struct LeastConnectionsBalancer {
    /// Server registry. BTreeMap so iteration order is the tie-break order.
    registry: RwLock<BTreeMap<String, Arc<ServerHandle>>>,
    /// Stamped onto each new handle so stale references are detectable
    next_generation: AtomicU64,
    /// Optimistic selection attempts before falling back to the write lock
    max_select_retries: u32,
    /// Per-server monitoring stats, updated off the selection critical path
    stats: DashMap<String, ServerStats>,
    total_requests: AtomicU64,
    failed_selections: AtomicU64,
    total_releases: AtomicU64,
}

impl LeastConnectionsBalancer {
    /// Create an empty balancer with the default retry budget
    pub fn new() -> Self {
        Self::with_retry_budget(DEFAULT_MAX_SELECT_RETRIES)
    }

    /// Create an empty balancer with a custom optimistic-retry budget
    pub fn with_retry_budget(max_select_retries: u32) -> Self {
        Self {
            registry: RwLock::new(BTreeMap::new()),
            next_generation: AtomicU64::new(0),
            max_select_retries: max_select_retries.max(1),
            stats: DashMap::new(),
            total_requests: AtomicU64::new(0),
            failed_selections: AtomicU64::new(0),
            total_releases: AtomicU64::new(0),
        }
    }

    /// Build a balancer from configuration, registering its initial servers
    ///
    /// Duplicate ids in the list fail with [`BalancerError::DuplicateServer`],
    /// same as the imperative path.
    pub fn from_config(config: &BalancerConfig) -> BalancerResult<Self> {
        config.validate()?;
        let balancer = Self::with_retry_budget(config.max_select_retries);
        for id in &config.servers {
            balancer.add_server(id.clone())?;
        }
        Ok(balancer)
    }

    /// The algorithm name used in stats and structured logs
    pub fn algorithm_name(&self) -> &'static str {
        "least_connections"
    }

    /// Register a new server with a connection count of zero
    ///
    /// Fails with [`BalancerError::DuplicateServer`] if the id is already
    /// registered. A silent no-op here could mask configuration bugs.
    pub fn add_server<S: Into<String>>(&self, id: S) -> BalancerResult<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(BalancerError::config("server ids must be non-empty"));
        }

        let mut registry = self.registry.write();
        let generation = match registry.entry(id.clone()) {
            Entry::Occupied(_) => return Err(BalancerError::duplicate_server(id)),
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                entry.insert(Arc::new(ServerHandle::new(id.clone(), generation)));
                generation
            }
        };
        let pool_size = registry.len();
        drop(registry);

        gauge!("load_balancer_registered_servers").set(pool_size as f64);
        debug!(
            server_id = %id,
            generation,
            pool_size,
            "Registered server"
        );
        Ok(())
    }

    /// Remove a server from the pool
    ///
    /// Fails with [`BalancerError::UnknownServer`] if the id is not
    /// registered and with [`BalancerError::ServerBusy`] while the server
    /// still has in-flight connections. Rejecting a busy removal avoids
    /// silently discarding accounting for work that is still running.
    pub fn remove_server(&self, id: &str) -> BalancerResult<()> {
        let mut registry = self.registry.write();
        let handle = registry
            .get(id)
            .ok_or_else(|| BalancerError::unknown_server(id))?;

        // The write lock excludes every selection path, so a zero count
        // cannot rise before the entry is gone. Concurrent releases only
        // lower it, and a release needs the read lock anyway.
        let active = handle.active_connections();
        if active > 0 {
            return Err(BalancerError::server_busy(id, active));
        }
        registry.remove(id);
        let pool_size = registry.len();
        drop(registry);

        self.stats.remove(id);
        gauge!("load_balancer_registered_servers").set(pool_size as f64);
        debug!(server_id = %id, pool_size, "Removed server");
        Ok(())
    }

    /// Select the least-loaded server and claim one connection on it
    ///
    /// Selection and increment are one indivisible step. Fails with
    /// [`BalancerError::NoServersAvailable`] on an empty pool; that is the
    /// one error expected in normal operation and callers should treat it as
    /// "no route available now".
    pub fn acquire(&self) -> BalancerResult<ServerRef> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        for _ in 0..self.max_select_retries {
            let registry = self.registry.read();
            let (handle, observed) = match Self::scan_least_loaded(&registry) {
                Some(candidate) => candidate,
                None => {
                    drop(registry);
                    return Err(self.fail_empty_pool());
                }
            };

            if handle.try_increment_from(observed) {
                let server =
                    ServerRef::new(handle.id().to_string(), handle.generation());
                drop(registry);
                self.record_selection(&server, observed + 1);
                return Ok(server);
            }
            drop(registry);
            // Another caller moved the chosen counter between scan and
            // commit. Rescan: the minimum may have shifted elsewhere.
            counter!("load_balancer_select_conflicts").increment(1);
        }

        // Contended pool: the write lock shuts out every other selection,
        // so scan plus plain increment is atomic here.
        let registry = self.registry.write();
        let (handle, observed) = match Self::scan_least_loaded(&registry) {
            Some(candidate) => candidate,
            None => {
                drop(registry);
                return Err(self.fail_empty_pool());
            }
        };
        debug_assert_eq!(handle.active_connections(), observed);
        let active_now = handle.increment();
        let server = ServerRef::new(handle.id().to_string(), handle.generation());
        drop(registry);
        self.record_selection(&server, active_now);
        Ok(server)
    }

    /// Return the connection claimed by a prior `acquire`
    ///
    /// Fails with [`BalancerError::UnknownServer`] if the server was removed
    /// (or removed and re-added) since the reference was issued — callers
    /// recover by dropping the reference. A second release for the same
    /// acquisition fails with [`BalancerError::CounterUnderflow`].
    pub fn release(&self, server: &ServerRef) -> BalancerResult<()> {
        let registry = self.registry.read();
        let handle = match registry.get(server.server_id()) {
            Some(handle) if handle.generation() == server.generation() => handle,
            _ => {
                drop(registry);
                warn!(
                    server_id = %server.server_id(),
                    "Release against a removed server; reference dropped"
                );
                return Err(BalancerError::unknown_server(server.server_id()));
            }
        };

        let remaining = handle.try_decrement().map_err(|err| {
            warn!(
                server_id = %server.server_id(),
                "Release without a matching acquire"
            );
            err
        })?;
        drop(registry);

        self.total_releases.fetch_add(1, Ordering::Relaxed);
        counter!("load_balancer_releases").increment(1);
        gauge!(
            "load_balancer_active_connections",
            "server" => server.server_id().to_string()
        )
        .set(remaining as f64);
        debug!(
            server_id = %server.server_id(),
            active_connections = remaining,
            "Released connection"
        );
        Ok(())
    }

    /// Current active-connection count for one server (diagnostic)
    pub fn count(&self, id: &str) -> BalancerResult<u64> {
        let registry = self.registry.read();
        registry
            .get(id)
            .map(|handle| handle.active_connections())
            .ok_or_else(|| BalancerError::unknown_server(id))
    }

    /// Registered server ids, in tie-break (lexicographic) order
    pub fn server_ids(&self) -> Vec<String> {
        self.registry.read().keys().cloned().collect()
    }

    /// Number of registered servers
    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Snapshot of balancer-wide and per-server statistics
    pub fn stats(&self) -> BalancerStats {
        let registry = self.registry.read();
        let mut servers = HashMap::with_capacity(registry.len());
        for (id, handle) in registry.iter() {
            let mut entry = self
                .stats
                .get(id)
                .map(|stats| stats.value().clone())
                .unwrap_or_default();
            entry.active_connections = handle.active_connections();
            servers.insert(id.clone(), entry);
        }
        drop(registry);

        BalancerStats {
            algorithm: self.algorithm_name().to_string(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_selections: self.failed_selections.load(Ordering::Relaxed),
            total_releases: self.total_releases.load(Ordering::Relaxed),
            servers,
        }
    }

    /// Clear monitoring counters
    ///
    /// Live connection accounting is untouched; only selection totals and
    /// timestamps reset.
    pub fn reset_stats(&self) {
        self.stats.clear();
        self.total_requests.store(0, Ordering::Relaxed);
        self.failed_selections.store(0, Ordering::Relaxed);
        self.total_releases.store(0, Ordering::Relaxed);
    }

    /// Find the handle with the fewest active connections.
    ///
    /// Returns the handle and the count it was observed at, so the caller
    /// can commit with a compare-and-increment against that observation.
    /// Only a strictly smaller count replaces the candidate, which keeps the
    /// first key in iteration order (the lexicographically smallest id) on
    /// ties.
    fn scan_least_loaded(
        registry: &BTreeMap<String, Arc<ServerHandle>>,
    ) -> Option<(&Arc<ServerHandle>, u64)> {
        let mut selected: Option<(&Arc<ServerHandle>, u64)> = None;
        for handle in registry.values() {
            let active = handle.active_connections();
            if selected.map_or(true, |(_, min)| active < min) {
                selected = Some((handle, active));
            }
        }
        selected
    }

    fn fail_empty_pool(&self) -> BalancerError {
        self.failed_selections.fetch_add(1, Ordering::Relaxed);
        counter!("load_balancer_failed_selections").increment(1);
        debug!(
            algorithm = self.algorithm_name(),
            "Acquire failed: no servers registered"
        );
        BalancerError::NoServersAvailable
    }

    fn record_selection(&self, server: &ServerRef, active_now: u64) {
        {
            let mut stats = self.stats.entry(server.server_id().to_string()).or_default();
            stats.selections += 1;
            stats.active_connections = active_now;
            stats.last_selected = Some(Utc::now());
        }

        counter!("load_balancer_selections").increment(1);
        gauge!(
            "load_balancer_active_connections",
            "server" => server.server_id().to_string()
        )
        .set(active_now as f64);
        debug!(
            server_id = %server.server_id(),
            active_connections = active_now,
            algorithm = self.algorithm_name(),
            "Selected server with least connections"
        );
    }
}

impl Default for LeastConnectionsBalancer {
    fn default() -> Self {
        Self::new()
    }
}
