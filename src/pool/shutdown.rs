//! Tearing the pool down: close every queue, then stop and remove every
//! registered sandbox under one aggregate deadline.

use serde::Serialize;
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{write, PoolManager};
use crate::runtime::{RuntimeClient, RuntimeError};

/// What teardown managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Sandboxes stopped and removed.
    pub retired: usize,
    /// Sandboxes whose removal failed.
    pub failed: usize,
    /// Whether the aggregate deadline cut teardown short.
    pub deadline_exceeded: bool,
}

impl PoolManager {
    /// Stops handing out sandboxes and removes every registered one.
    ///
    /// Blocked acquirers wake with an error and later releases are ignored.
    /// Individual stop/remove failures are logged and counted. Safe to call
    /// more than once; later calls find nothing to do.
    pub async fn cleanup_containers(&self) -> ShutdownReport {
        let first = !self.shutting_down.swap(true, Ordering::SeqCst);
        if first {
            info!("Shutting down sandbox pool");
        }

        let queues = mem::take(&mut *write(&self.queues));
        for (language, queue) in queues {
            let idle = queue.close();
            debug!(%language, idle = idle.len(), "Closed idle queue");
        }

        let sandboxes = self.registry.snapshot();
        if sandboxes.is_empty() {
            debug!("No sandboxes to clean up");
            return ShutdownReport::default();
        }

        let deadline = self.settings.teardown_deadline(sandboxes.len());
        info!(
            count = sandboxes.len(),
            deadline_secs = deadline.as_secs_f64(),
            "Cleaning up sandboxes"
        );

        let mut tasks = JoinSet::new();
        for sandbox in sandboxes {
            let runtime = Arc::clone(&self.runtime);
            let stop_timeout = self.settings.stop_timeout;
            let cleanup_timeout = self.settings.cleanup_timeout;
            tasks.spawn(async move {
                let result = retire(runtime.as_ref(), &sandbox.id, stop_timeout, cleanup_timeout).await;
                (sandbox.id, result)
            });
        }

        let mut report = ShutdownReport::default();
        let joined = tokio::time::timeout(deadline, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, Ok(()))) => {
                        self.registry.remove(&id);
                        report.retired += 1;
                    }
                    Ok((id, Err(e))) => {
                        warn!(container_id = %id, error = %e, "Failed to remove sandbox");
                        report.failed += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "Cleanup task panicked");
                        report.failed += 1;
                    }
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                remaining = tasks.len(),
                "Sandbox cleanup deadline exceeded, abandoning remaining removals"
            );
            report.deadline_exceeded = true;
            tasks.shutdown().await;
        }

        self.registry.clear();
        info!(
            retired = report.retired,
            failed = report.failed,
            "Sandbox cleanup finished"
        );
        report
    }
}

/// Stops `id` with a bounded grace period, then force-removes it.
///
/// A failed or slow stop is logged and removal still runs; only the removal
/// result is returned.
pub(super) async fn retire(
    runtime: &dyn RuntimeClient,
    id: &str,
    stop_timeout: Duration,
    cleanup_timeout: Duration,
) -> Result<(), RuntimeError> {
    match tokio::time::timeout(cleanup_timeout, runtime.stop_container(id, stop_timeout)).await {
        Ok(Ok(())) => debug!(container_id = id, "Sandbox stopped"),
        Ok(Err(e)) => debug!(container_id = id, error = %e, "Stop failed, forcing removal"),
        Err(_) => debug!(container_id = id, "Stop timed out, forcing removal"),
    }

    force_remove(runtime, id, cleanup_timeout).await
}

/// Force-removes `id`, killing whatever still runs in it, within `timeout`.
pub(super) async fn force_remove(
    runtime: &dyn RuntimeClient,
    id: &str,
    timeout: Duration,
) -> Result<(), RuntimeError> {
    match tokio::time::timeout(timeout, runtime.remove_container(id, true)).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::container_failed(
            "remove",
            format!("timed out after {}s", timeout.as_secs_f64()),
        )),
    }
}
