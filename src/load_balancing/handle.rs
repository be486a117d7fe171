//! Server handles and the opaque reference token returned by `acquire`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::core::error::{BalancerError, BalancerResult};

/// One backend endpoint and its live connection counter.
///
/// Handles are owned exclusively by the balancer's registry; callers never
/// hold one directly. The counter is an atomic so diagnostic reads and the
/// optimistic selection path in `acquire` can run without the registry's
/// write lock.
#[derive(Debug)]
pub struct ServerHandle {
    id: String,
    generation: u64,
    active: AtomicU64,
}

impl ServerHandle {
    pub(crate) fn new(id: String, generation: u64) -> Self {
        Self {
            id,
            generation,
            active: AtomicU64::new(0),
        }
    }

    /// The caller-supplied server identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Generation stamped when this handle was registered. A re-added server
    /// gets a fresh generation, which is how stale references are detected.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Current active-connection count.
    ///
    /// A snapshot read: atomic with respect to individual increments and
    /// decrements, but not ordered against concurrent selection beyond that.
    pub fn active_connections(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Unconditionally add one connection, returning the new count.
    ///
    /// Only called with the registry write lock held, where no competing
    /// selection can run.
    pub(crate) fn increment(&self) -> u64 {
        self.active.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Add one connection only if the count still equals `observed`.
    ///
    /// This is the commit point of the optimistic selection path: it
    /// re-validates that the chosen minimum is unchanged before taking the
    /// slot. Returns `false` on conflict, in which case the caller rescans.
    pub(crate) fn try_increment_from(&self, observed: u64) -> bool {
        self.active
            .compare_exchange(observed, observed + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Remove one connection, returning the new count.
    ///
    /// Errors with [`BalancerError::CounterUnderflow`] instead of going
    /// negative. Clamping to zero was the alternative; the error is chosen
    /// because an unmatched release is a caller bug worth surfacing.
    pub(crate) fn try_decrement(&self) -> BalancerResult<u64> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|previous| previous - 1)
            .map_err(|_| BalancerError::underflow(&self.id))
    }
}

/// Opaque reference to an acquired server, returned by `acquire` and redeemed
/// by `release`.
///
/// Carries the server id plus the registration generation, so a reference
/// that outlives its server cannot be confused with a same-named server
/// registered later. `Clone` is provided so callers can move the token across
/// threads or queues; releasing the same logical acquisition twice is a
/// protocol violation the balancer reports at release time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerRef {
    server_id: String,
    generation: u64,
}

impl ServerRef {
    pub(crate) fn new(server_id: String, generation: u64) -> Self {
        Self {
            server_id,
            generation,
        }
    }

    /// The id of the server this reference points at
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}
