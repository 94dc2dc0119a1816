// Gateway module for diagnosis - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod classifier;
mod signatures;
mod types;

// Public re-exports - the ONLY way to access diagnosis functionality
pub use classifier::{classify, find_auth_conflict, probe_verdict, ssl_mismatch, AuthConflict, ProbeVerdict};
pub use signatures::{ErrorSignature, MatchSource, SignatureMatch};
pub use types::{Evidence, Issue, IssueCategory, IssueResource, RemediationAction, Severity};
