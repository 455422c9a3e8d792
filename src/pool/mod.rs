//! Per-language pools of reusable sandboxes.
//!
//! [`PoolManager`] owns one bounded idle queue per language and a registry of
//! every started sandbox. Callers borrow a sandbox with [`PoolManager::acquire`]
//! and hand it back with [`PoolManager::release`]; the queues double as the
//! concurrency limit, so waiting for a sandbox is waiting for a queue slot.
//!
//! Submodules split the lifecycle:
//! - `images`: pre-pulling execution images
//! - `supervisor`: starting the initial population and replacing sandboxes
//! - `shutdown`: draining queues and removing every sandbox

mod error;
mod images;
mod queue;
mod registry;
mod shutdown;
mod supervisor;

pub use error::{PoolError, ProvisionStage, ProvisioningError};
pub use images::PullOutcome;
pub use registry::{Sandbox, SandboxInfo};
pub use shutdown::ShutdownReport;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::{CallContext, DoneReason};
use crate::exec::{ExecReport, ExecutionEngine};
use crate::language::Languages;
use crate::runtime::RuntimeClient;
use queue::{IdleQueue, PutError};
use registry::Registry;

/// What to do with a sandbox whose execution timed out or ran past its output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Retire it and start a fresh sandbox in its place.
    #[default]
    Replace,
    /// Return it to the idle queue as is. The abandoned process may still be running.
    Reuse,
}

/// Timeouts and knobs the pool runs with.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// How long `submit` waits for an idle sandbox.
    pub acquire_timeout: Duration,
    /// Limit on a single execution.
    pub exec_timeout: Duration,
    /// Grace passed to the runtime when stopping a sandbox.
    pub stop_timeout: Duration,
    /// Bound on a single stop or forced removal, and the per-sandbox teardown increment.
    pub cleanup_timeout: Duration,
    /// Fixed part of the aggregate teardown deadline.
    pub cleanup_base: Duration,
    /// What `submit` does with a sandbox that may still be busy.
    pub timeout_policy: TimeoutPolicy,
    /// Command that keeps an idle sandbox alive.
    pub keepalive: Vec<String>,
    /// Prefix of generated container names.
    pub name_prefix: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(10),
            exec_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            cleanup_timeout: Duration::from_secs(10),
            cleanup_base: Duration::from_secs(5),
            timeout_policy: TimeoutPolicy::Replace,
            keepalive: vec!["sleep".to_string(), "infinity".to_string()],
            name_prefix: "sandpool".to_string(),
        }
    }
}

impl PoolSettings {
    /// Aggregate deadline for tearing down `count` sandboxes.
    pub fn teardown_deadline(&self, count: usize) -> Duration {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.cleanup_base + self.cleanup_timeout.saturating_mul(count)
    }
}

/// What [`PoolManager::release`] did with the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Back in its idle queue.
    Requeued,
    /// Not requeued because the pool is shutting down; teardown removes it.
    Discarded,
    /// The queue was full or missing. Indicates a capacity accounting bug.
    Dropped,
}

/// Idle/registered counts for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageStats {
    /// Language tag.
    pub language: String,
    /// Maximum number of idle sandboxes the queue holds.
    pub capacity: usize,
    /// Sandboxes waiting in the queue right now.
    pub idle: usize,
    /// Live sandboxes of this language, idle or in use.
    pub registered: usize,
}

/// Point-in-time view of the whole pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// One entry per started language.
    pub languages: Vec<LanguageStats>,
    /// Live sandboxes across all languages.
    pub registered: usize,
    /// True once cleanup has begun.
    pub shutting_down: bool,
}

/// Pools of sandboxes for every configured language.
pub struct PoolManager {
    runtime: Arc<dyn RuntimeClient>,
    languages: Arc<Languages>,
    settings: PoolSettings,
    registry: Arc<Registry>,
    queues: RwLock<HashMap<String, Arc<IdleQueue>>>,
    shutting_down: AtomicBool,
}

impl PoolManager {
    /// Creates a manager for `languages`. Fails if no language is configured.
    pub fn initialize(
        runtime: Arc<dyn RuntimeClient>,
        languages: Arc<Languages>,
        settings: PoolSettings,
    ) -> Result<Self, PoolError> {
        if languages.is_empty() {
            return Err(PoolError::NoLanguages);
        }
        info!(
            languages = ?languages.names().collect::<Vec<_>>(),
            "Initializing sandbox pool"
        );
        Ok(Self {
            runtime,
            languages,
            settings,
            registry: Arc::default(),
            queues: RwLock::default(),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Language table the pool was built for.
    pub fn languages(&self) -> &Languages {
        &self.languages
    }

    /// Timeouts and policies in effect.
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// True once cleanup has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn queue(&self, language: &str) -> Result<Arc<IdleQueue>, PoolError> {
        if !self.languages.contains(language) {
            return Err(PoolError::unknown_language(language));
        }
        if let Some(queue) = read(&self.queues).get(language).cloned() {
            return Ok(queue);
        }
        // Cleanup takes the queues after setting the flag.
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        Err(PoolError::NotStarted {
            language: language.to_string(),
        })
    }

    /// Waits for an idle sandbox of `language`.
    ///
    /// Returns immediately for unknown languages or during shutdown. Otherwise
    /// blocks until a sandbox is free, the queue is closed, or `ctx` is done.
    pub async fn acquire(&self, ctx: &CallContext, language: &str) -> Result<Sandbox, PoolError> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        let queue = self.queue(language)?;
        debug!(language, idle = queue.len(), "Acquiring sandbox");

        tokio::select! {
            biased;
            reason = ctx.done() => Err(match reason {
                DoneReason::DeadlineExceeded => PoolError::AcquisitionTimeout {
                    language: language.to_string(),
                },
                DoneReason::Cancelled => PoolError::Cancelled {
                    language: language.to_string(),
                },
            }),
            taken = queue.take() => match taken {
                Ok(sandbox) => {
                    debug!(container_id = sandbox.id(), language, "Sandbox acquired");
                    Ok(sandbox)
                }
                Err(_) => Err(PoolError::QueueClosed {
                    language: language.to_string(),
                }),
            },
        }
    }

    /// Returns a sandbox to its idle queue without blocking.
    ///
    /// During shutdown this does nothing; the sandbox stays registered and is
    /// removed by teardown.
    pub fn release(&self, sandbox: Sandbox, language: &str) -> ReleaseOutcome {
        if self.is_shutting_down() {
            info!(
                container_id = sandbox.id(),
                language, "Pool shutting down, not requeuing sandbox"
            );
            return ReleaseOutcome::Discarded;
        }

        if sandbox.language() != language {
            warn!(
                container_id = sandbox.id(),
                requested = language,
                actual = sandbox.language(),
                "Release language does not match sandbox, using the sandbox's own"
            );
        }
        let language = sandbox.language().to_string();

        let Some(queue) = read(&self.queues).get(&language).cloned() else {
            warn!(container_id = sandbox.id(), %language, "No idle queue for sandbox, dropping handle");
            return ReleaseOutcome::Dropped;
        };

        match queue.try_put(sandbox) {
            Ok(()) => {
                debug!(%language, idle = queue.len(), "Sandbox released");
                ReleaseOutcome::Requeued
            }
            Err(PutError::Closed(sandbox)) => {
                info!(
                    container_id = sandbox.id(),
                    %language, "Idle queue closed, not requeuing sandbox"
                );
                ReleaseOutcome::Discarded
            }
            Err(PutError::Full(sandbox)) => {
                warn!(
                    container_id = sandbox.id(),
                    %language,
                    capacity = queue.capacity(),
                    "Idle queue full on release, dropping sandbox handle"
                );
                ReleaseOutcome::Dropped
            }
        }
    }

    /// Copies of every registered sandbox.
    pub fn get_containers(&self) -> Vec<SandboxInfo> {
        self.registry.snapshot()
    }

    /// Idle and registered counts per language.
    pub fn stats(&self) -> PoolStats {
        let registered = self.registry.snapshot();
        let queues = read(&self.queues);
        let languages = self
            .languages
            .names()
            .map(|language| {
                let queue = queues.get(language);
                LanguageStats {
                    language: language.to_string(),
                    capacity: queue.map_or(0, |q| q.capacity()),
                    idle: queue.map_or(0, |q| q.len()),
                    registered: registered.iter().filter(|s| s.language == language).count(),
                }
            })
            .collect();

        PoolStats {
            languages,
            registered: registered.len(),
            shutting_down: self.is_shutting_down(),
        }
    }

    /// Acquires a sandbox, runs `code` in it and hands it back.
    ///
    /// Under [`TimeoutPolicy::Replace`] a sandbox that may still be running the
    /// code (timed out, or output ended while the process ran on) is retired
    /// and replaced instead of being requeued. The report is returned only
    /// after that: one force remove plus a create and start of the
    /// replacement, each bounded by `cleanup_timeout`.
    pub async fn submit(
        &self,
        ctx: &CallContext,
        engine: &ExecutionEngine,
        language: &str,
        code: &str,
    ) -> Result<ExecReport, PoolError> {
        if !self.languages.contains(language) {
            return Err(PoolError::unknown_language(language));
        }

        let acquire_ctx = ctx.child_with_timeout(self.settings.acquire_timeout);
        let sandbox = self.acquire(&acquire_ctx, language).await?;

        let report = engine.execute(ctx, &sandbox, language, code).await;

        if report.needs_reset() && self.settings.timeout_policy == TimeoutPolicy::Replace {
            self.recycle(sandbox).await;
        } else {
            self.release(sandbox, language);
        }
        Ok(report)
    }

    /// Releases the runtime client connection. Call after [`PoolManager::cleanup_containers`].
    pub async fn close(&self) {
        info!("Closing runtime client");
        match self.runtime.close().await {
            Ok(()) => debug!("Runtime client closed"),
            Err(e) => warn!(error = %e, "Error closing runtime client"),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
