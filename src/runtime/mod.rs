// Gateway module for the run pipeline - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod pipeline;
mod report;

// Public re-exports - the ONLY way to access runtime functionality
pub use pipeline::{Diagnosis, Mode, Pipeline, PipelineOptions};
pub use report::{format_restore, RunReport};
