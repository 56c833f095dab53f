// ABOUTME: Docker integration resolving container ids to attachable session TTYs

pub mod backend;
pub mod container_manager;

pub use backend::{AttachedTty, BackendError, ContainerBackend, InputSink, OutputStream};
pub use container_manager::{DockerBackend, MANAGED_LABEL};
