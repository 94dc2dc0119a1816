// Gateway module for remediation - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod engine;
mod transforms;
mod types;

// Public re-exports - the ONLY way to access remediation functionality
pub use engine::RemediationEngine;
pub use transforms::{canonical_consumer, replace_consumer_auth, set_ssl_verify};
pub use types::{FixOutcome, FixScope, LedgerEntry, RemediationLedger};
