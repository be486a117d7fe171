//! # Connection Balancer Library
//!
//! A least-connections selection engine: a registry of backend servers, each
//! with a live connection counter, and a selection policy that routes every
//! new unit of work to the server currently handling the fewest active
//! connections.
//!
//! The engine is safe to call concurrently from many threads. Selection and
//! counter increment happen as one indivisible step, so two simultaneous
//! callers can never both pick the same momentarily-least-loaded server and
//! overshoot it. Ties are broken deterministically by lexicographic server id.
//!
//! ## Usage Example
//!
//! ```rust
//! use conn_balancer::LeastConnectionsBalancer;
//!
//! let balancer = LeastConnectionsBalancer::new();
//! balancer.add_server("backend-a")?;
//! balancer.add_server("backend-b")?;
//!
//! // One acquire/release pair per unit of work.
//! let server = balancer.acquire()?;
//! // ... dispatch work to server.server_id() ...
//! balancer.release(&server)?;
//! # Ok::<(), conn_balancer::BalancerError>(())
//! ```
//!
//! The crate has no network surface of its own: the caller owns request
//! dispatch and decides when a unit of work starts and ends.

/// Core functionality: error types and balancer configuration
pub mod core;

/// The least-connections balancer, server handles, and monitoring stats
pub mod load_balancing;

// Re-export the public API surface so users don't need to know the module tree.

/// Main error type and result alias used throughout the crate
pub use crate::core::error::{BalancerError, BalancerResult};

/// Balancer configuration structure
pub use crate::core::config::BalancerConfig;

/// Primary entry points: the balancer itself and the token it hands out
pub use crate::load_balancing::{
    BalancerStats, LeastConnectionsBalancer, ServerRef, ServerStats,
};
