// Gateway module for observer - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod retry;
mod state_observer;
mod traffic;

// Public re-exports - the ONLY way to access observer functionality
pub use retry::RetryPolicy;
pub use state_observer::{probe_request, Observation, ProbeRecord, StateObserver};
pub use traffic::{GatewayTraffic, HttpTraffic, ProbeRequest, ProbeResponse};
