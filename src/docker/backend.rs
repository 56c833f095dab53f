// ABOUTME: Container backend seam used by the bridge server
// Resolves a container id to an attached TTY and applies resizes to it

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncWrite;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Docker connection error: {0}")]
    Connection(#[from] bollard::errors::Error),
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Container operation failed: {0}")]
    OperationFailed(String),
}

/// TTY output chunks, stdout and stderr interleaved as the container wrote them
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, BackendError>> + Send>>;

/// TTY input
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// A container TTY attached for streaming
pub struct AttachedTty {
    pub output: OutputStream,
    pub input: InputSink,
}

#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Resolve `container_id` to a running container and attach to its TTY
    async fn open_session(&self, container_id: &str) -> Result<AttachedTty, BackendError>;

    async fn resize(&self, container_id: &str, cols: u16, rows: u16) -> Result<(), BackendError>;

    /// Called once the socket for `container_id` is gone
    async fn close_session(&self, container_id: &str) -> Result<(), BackendError>;
}
