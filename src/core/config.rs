//! # Configuration Module
//!
//! Configuration for the balancer. The crate does not load files itself;
//! the embedding application owns configuration sourcing and hands the
//! deserialized structure to [`LeastConnectionsBalancer::from_config`].
//!
//! [`LeastConnectionsBalancer::from_config`]:
//! crate::load_balancing::LeastConnectionsBalancer::from_config

use serde::{Deserialize, Serialize};

use crate::core::error::{BalancerError, BalancerResult};

/// Default number of optimistic selection attempts before `acquire` falls
/// back to the exclusive-lock path.
pub const DEFAULT_MAX_SELECT_RETRIES: u32 = 8;

/// Balancer configuration
///
/// Uses serde so it can be embedded in an application's YAML/JSON/TOML
/// configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// How many times `acquire` retries its optimistic compare-and-increment
    /// before taking the registry write lock
    #[serde(default = "default_max_select_retries")]
    pub max_select_retries: u32,

    /// Servers to register at construction time, by id
    #[serde(default)]
    pub servers: Vec<String>,
}

fn default_max_select_retries() -> u32 {
    DEFAULT_MAX_SELECT_RETRIES
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            max_select_retries: DEFAULT_MAX_SELECT_RETRIES,
            servers: Vec::new(),
        }
    }
}

impl BalancerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> BalancerResult<()> {
        if self.max_select_retries == 0 {
            return Err(BalancerError::config(
                "max_select_retries must be at least 1",
            ));
        }
        if self.servers.iter().any(|id| id.is_empty()) {
            return Err(BalancerError::config("server ids must be non-empty"));
        }
        Ok(())
    }
}
