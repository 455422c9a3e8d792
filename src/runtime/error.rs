//! Domain-specific error types for container runtime operations.
//!
//! Typed errors let the pool tell a missing image apart from a dead
//! daemon without parsing message strings.

/// Errors returned by a [`RuntimeClient`](super::RuntimeClient).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Docker daemon is not running or not accessible.
    #[error("Docker is not available: {message}")]
    DockerUnavailable {
        /// Underlying error text.
        message: String,
    },

    /// Container image was not found and could not be pulled.
    #[error("Container image not found: {image}")]
    ImageNotFound {
        /// Image reference as requested.
        image: String,
    },

    /// A container lifecycle call (create, start, stop, remove) failed.
    #[error("Container {op} failed: {message}")]
    ContainerFailed {
        /// Operation that failed.
        op: &'static str,
        /// Underlying error text.
        message: String,
    },

    /// An exec session call (create, attach, inspect) failed.
    #[error("Exec {op} failed: {message}")]
    ExecFailed {
        /// Operation that failed.
        op: &'static str,
        /// Underlying error text.
        message: String,
    },

    /// The client connection was closed.
    #[error("Runtime client is closed")]
    Closed,
}

impl RuntimeError {
    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates an `ImageNotFound` error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound {
            image: image.into(),
        }
    }

    /// Creates a `ContainerFailed` error for the named operation.
    pub fn container_failed(op: &'static str, message: impl Into<String>) -> Self {
        Self::ContainerFailed {
            op,
            message: message.into(),
        }
    }

    /// Creates an `ExecFailed` error for the named operation.
    pub fn exec_failed(op: &'static str, message: impl Into<String>) -> Self {
        Self::ExecFailed {
            op,
            message: message.into(),
        }
    }

    /// Returns true if the daemon could not be reached.
    pub fn is_docker_unavailable(&self) -> bool {
        matches!(self, Self::DockerUnavailable { .. })
    }

    /// Returns true if this is an image not found error.
    pub fn is_image_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound { .. })
    }

    /// Returns true if the client was already closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
