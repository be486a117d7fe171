pub mod balancer;
pub mod handle;
pub mod stats;

pub use balancer::LeastConnectionsBalancer;
pub use handle::{ServerHandle, ServerRef};
pub use stats::{BalancerStats, ServerStats};
