//! Container runtime capability surface.
//!
//! The pool and execution engine only ever talk to a [`RuntimeClient`]. The
//! production implementation is [`DockerRuntime`]; tests use an in-memory
//! scripted runtime.

mod docker;
mod error;
#[cfg(test)]
pub(crate) mod mock;

pub use docker::DockerRuntime;
pub use error::RuntimeError;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::time::Duration;

/// One demultiplexed frame of exec output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    /// Bytes written to the process's stdout.
    Stdout(Bytes),
    /// Bytes written to the process's stderr.
    Stderr(Bytes),
}

/// Combined output stream of an attached exec session.
///
/// Dropping the stream releases the underlying attach connection.
pub type OutputStream = BoxStream<'static, Result<OutputChunk, RuntimeError>>;

/// Create/start/stop/remove/exec primitives of a container runtime.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Ensures `image` is present locally, pulling it if missing.
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Creates a container named `name` from `image` running `command`.
    /// Returns the runtime-assigned container id.
    async fn create_container(
        &self,
        name: &str,
        image: &str,
        command: &[String],
    ) -> Result<String, RuntimeError>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stops a running container, giving it `grace` before it is killed.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Removes a container. With `force`, a running container is killed first.
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// Creates an exec session running `command` inside container `id`.
    /// Returns the exec id.
    async fn exec_create(&self, id: &str, command: Vec<String>) -> Result<String, RuntimeError>;

    /// Starts the exec session and attaches to its combined output.
    async fn exec_attach(&self, exec_id: &str) -> Result<OutputStream, RuntimeError>;

    /// Returns the exit code of a finished exec session, or `None` while it runs.
    async fn exec_inspect(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError>;

    /// Releases the client connection. Later calls fail with [`RuntimeError::Closed`].
    async fn close(&self) -> Result<(), RuntimeError>;
}
