//! Monitoring snapshots for the balancer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Balancer-wide statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BalancerStats {
    pub algorithm: String,
    /// Total `acquire` calls, including failed ones
    pub total_requests: u64,
    /// `acquire` calls that found an empty pool
    pub failed_selections: u64,
    /// Successful `release` calls
    pub total_releases: u64,
    /// Per-server detail, keyed by server id
    pub servers: HashMap<String, ServerStats>,
}

/// Per-server statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStats {
    /// How many times this server was selected by `acquire`
    pub selections: u64,
    /// Active connections at snapshot time
    pub active_connections: u64,
    /// When this server was last selected
    pub last_selected: Option<DateTime<Utc>>,
}
