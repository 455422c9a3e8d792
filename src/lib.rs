//! Pools of pre-started container sandboxes that run untrusted code snippets.
//!
//! A [`PoolManager`] keeps a fixed number of idle sandboxes per language,
//! hands them out one caller at a time and tears all of them down within a
//! bounded time on shutdown. An [`ExecutionEngine`] runs one snippet inside an
//! acquired sandbox and classifies the result. Both talk to the container
//! runtime only through [`RuntimeClient`]; [`DockerRuntime`] is the Docker
//! implementation.

pub mod config;
pub mod context;
pub mod exec;
pub mod language;
pub mod pool;
pub mod runtime;

pub use config::Config;
pub use context::{CallContext, DoneReason};
pub use exec::{ExecReport, ExecStatus, ExecutionEngine};
pub use language::Languages;
pub use pool::{PoolError, PoolManager, PoolSettings, Sandbox, SandboxInfo, TimeoutPolicy};
pub use runtime::{DockerRuntime, RuntimeClient, RuntimeError};
