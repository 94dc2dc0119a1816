// Gateway module for container networking - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod docker;
mod types;

// Public re-exports - the ONLY way to access network functionality
#[cfg(test)]
pub use docker::MockContainerRuntime;
pub use docker::{detect_runtime_binary, ContainerRuntime, DockerRuntime, MissingRuntime};
pub use types::{NetworkTopology, PathResult, Reachability, ServicePath};
