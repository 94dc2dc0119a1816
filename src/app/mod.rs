// Gateway module for app - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod config;
mod desired;

// Public re-exports - the ONLY way to access app functionality
pub use config::{
    get_config_dir, init_config, load_config, save_config, AdminConfig, Config, DesiredConfig,
    GatewayConfig, NetworkConfig, ProbeConfig, ProviderConfig, RuntimeConfig, SnapshotConfig,
    TimeoutConfig,
};
pub use desired::{DesiredState, ProbeSpec, ProviderSpec};
