// Gateway module for snapshots - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod manager;
mod types;

// Public re-exports - the ONLY way to access snapshot functionality
pub use manager::SnapshotManager;
pub use types::{CaptureGap, EnvFileEntry, RestoreFailure, RestoreOptions, RestoreReport, Snapshot};
