pub mod admin;
pub mod app;
pub mod cli;
pub mod constants;
pub mod diagnosis;
pub mod network;
pub mod observer;
pub mod remediation;
pub mod runtime;
pub mod snapshot;
pub mod utils;
pub mod verify;

#[cfg(test)]
mod testing;

pub use app::{load_config, Config, DesiredState};
pub use runtime::{Mode, Pipeline, PipelineOptions, RunReport};
pub use utils::DoctorError;
