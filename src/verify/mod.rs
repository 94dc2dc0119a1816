// Gateway module for verification - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod probe;
mod tracker;

// Public re-exports - the ONLY way to access verification functionality
pub use probe::VerificationProbe;
pub use tracker::{CheckResult, IssueState, TrackedIssue};
