//! Starting the initial sandbox population and replacing retired sandboxes.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::error::{PoolError, ProvisionStage, ProvisioningError};
use super::queue::{IdleQueue, PutError};
use super::registry::Sandbox;
use super::shutdown::{force_remove, retire};
use super::{write, PoolManager};
use crate::context::CallContext;
use crate::runtime::RuntimeClient;

/// Everything a provisioning task needs, owned so the task can be spawned.
#[derive(Debug, Clone)]
struct ProvisionRequest {
    language: String,
    image: String,
    slot: Option<usize>,
    name: String,
    keepalive: Vec<String>,
    cleanup_timeout: Duration,
}

impl ProvisionRequest {
    fn failure(&self, stage: ProvisionStage, message: impl ToString) -> ProvisioningError {
        ProvisioningError {
            language: self.language.clone(),
            slot: self.slot,
            stage,
            message: message.to_string(),
        }
    }
}

impl PoolManager {
    /// Creates and starts `count` sandboxes for every configured language.
    ///
    /// All sandboxes are provisioned concurrently. Individual failures are
    /// logged and the pool runs with whatever started; only a total of zero
    /// started sandboxes across all languages is an error. Returns the number
    /// of sandboxes started.
    pub async fn start_initial_containers(
        &self,
        ctx: &CallContext,
        count: usize,
    ) -> Result<usize, PoolError> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }

        {
            let mut queues = write(&self.queues);
            if let Some(language) = self.languages.names().find(|l| queues.contains_key(*l)) {
                return Err(PoolError::AlreadyStarted {
                    language: language.to_string(),
                });
            }
            for language in self.languages.names() {
                queues.insert(language.to_string(), Arc::new(IdleQueue::new(count)));
            }
        }

        info!(
            count,
            languages = self.languages.names().count(),
            "Creating and starting initial sandboxes"
        );

        let mut tasks = JoinSet::new();
        for language in self.languages.names() {
            for slot in 0..count {
                if let Some(request) = self.provision_request(language, Some(slot)) {
                    tasks.spawn(provision(Arc::clone(&self.runtime), request, ctx.child()));
                }
            }
        }

        let mut started = 0;
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(sandbox)) => match self.register(sandbox) {
                    Ok(()) => started += 1,
                    Err(sandbox) => self.retire_unregistered(sandbox).await,
                },
                Ok(Err(failure)) => {
                    warn!(%failure, "Sandbox provisioning failed");
                    failures.push(failure);
                }
                Err(e) => {
                    error!(error = %e, "Provisioning task panicked");
                    failures.push(ProvisioningError {
                        language: "unknown".to_string(),
                        slot: None,
                        stage: ProvisionStage::Cancelled,
                        message: e.to_string(),
                    });
                }
            }
        }

        if started == 0 {
            error!(failures = failures.len(), "No sandboxes were started successfully");
            return Err(PoolError::NoSandboxesStarted { failures });
        }

        if failures.is_empty() {
            info!(started, "Sandboxes started successfully");
        } else {
            warn!(
                started,
                failed = failures.len(),
                "Sandboxes started with reduced capacity"
            );
        }
        Ok(started)
    }

    /// Force-removes a possibly contaminated sandbox, skipping the graceful
    /// stop, and starts a fresh one in its place.
    ///
    /// Returns the replacement's id. If the replacement cannot be started the
    /// language keeps running with one sandbox fewer. During shutdown the
    /// sandbox is only retired.
    pub async fn recycle(&self, sandbox: Sandbox) -> Option<String> {
        let info = sandbox.into_info();
        info!(container_id = %info.id, language = %info.language, "Recycling sandbox");

        self.registry.remove(&info.id);
        // The sandbox may still be busy, so there is nothing to stop gracefully.
        if let Err(e) = force_remove(self.runtime.as_ref(), &info.id, self.settings.cleanup_timeout).await {
            warn!(container_id = %info.id, error = %e, "Failed to remove recycled sandbox");
        }

        if self.is_shutting_down() {
            return None;
        }

        let request = self.provision_request(&info.language, None)?;
        let ctx = CallContext::with_timeout(self.settings.cleanup_timeout.saturating_mul(2));
        match provision(Arc::clone(&self.runtime), request, ctx).await {
            Ok(replacement) => {
                let id = replacement.id().to_string();
                match self.register(replacement) {
                    Ok(()) => {
                        info!(container_id = %id, language = %info.language, "Replacement sandbox ready");
                        Some(id)
                    }
                    Err(replacement) => {
                        self.retire_unregistered(replacement).await;
                        None
                    }
                }
            }
            Err(failure) => {
                warn!(%failure, "Replacement failed, pool runs with reduced capacity");
                None
            }
        }
    }

    fn provision_request(&self, language: &str, slot: Option<usize>) -> Option<ProvisionRequest> {
        let spec = self.languages.get(language)?;
        Some(ProvisionRequest {
            language: language.to_string(),
            image: spec.image.clone(),
            slot,
            name: container_name(&self.settings.name_prefix, language),
            keepalive: self.settings.keepalive.clone(),
            cleanup_timeout: self.settings.cleanup_timeout,
        })
    }

    /// Registers a started sandbox and makes it available.
    ///
    /// Refuses (handing the sandbox back) once shutdown has begun, so nothing
    /// is registered after teardown took its snapshot.
    fn register(&self, sandbox: Sandbox) -> Result<(), Sandbox> {
        if !self
            .registry
            .insert_if(sandbox.info().clone(), || !self.is_shutting_down())
        {
            return Err(sandbox);
        }

        let language = sandbox.language().to_string();
        let Some(queue) = super::read(&self.queues).get(&language).cloned() else {
            warn!(container_id = sandbox.id(), %language, "Registered sandbox has no idle queue");
            return Ok(());
        };
        match queue.try_put(sandbox) {
            Ok(()) => {}
            Err(PutError::Full(sandbox)) => warn!(
                container_id = sandbox.id(),
                %language,
                capacity = queue.capacity(),
                "Idle queue full while registering sandbox"
            ),
            Err(PutError::Closed(sandbox)) => debug!(
                container_id = sandbox.id(),
                %language,
                "Idle queue closed while registering sandbox"
            ),
        }
        Ok(())
    }

    async fn retire_unregistered(&self, sandbox: Sandbox) {
        debug!(container_id = sandbox.id(), "Shutdown in progress, retiring new sandbox");
        if let Err(e) = retire(
            self.runtime.as_ref(),
            sandbox.id(),
            self.settings.stop_timeout,
            self.settings.cleanup_timeout,
        )
        .await
        {
            warn!(container_id = sandbox.id(), error = %e, "Failed to remove sandbox");
        }
    }
}

/// Creates and starts one sandbox. A created sandbox that fails to start is
/// force-removed before the failure is reported.
async fn provision(
    runtime: Arc<dyn RuntimeClient>,
    request: ProvisionRequest,
    ctx: CallContext,
) -> Result<Sandbox, ProvisioningError> {
    debug!(language = %request.language, name = %request.name, "Creating sandbox");
    let created = tokio::select! {
        biased;
        reason = ctx.done() => Err(request.failure(ProvisionStage::Cancelled, reason)),
        created = runtime.create_container(&request.name, &request.image, &request.keepalive) => {
            created.map_err(|e| request.failure(ProvisionStage::Create, e))
        }
    };
    let id = created?;

    let started = tokio::select! {
        biased;
        reason = ctx.done() => Err(request.failure(ProvisionStage::Cancelled, reason)),
        started = runtime.start_container(&id) => {
            started.map_err(|e| request.failure(ProvisionStage::Start, e))
        }
    };
    if let Err(failure) = started {
        remove_unstarted(runtime.as_ref(), &id, request.cleanup_timeout).await;
        return Err(failure);
    }

    info!(container_id = %id, language = %request.language, slot = ?request.slot, "Sandbox started");
    Ok(Sandbox::new(id, request.language, request.image))
}

async fn remove_unstarted(runtime: &dyn RuntimeClient, id: &str, timeout: Duration) {
    match force_remove(runtime, id, timeout).await {
        Ok(()) => debug!(container_id = id, "Removed unstartable sandbox"),
        Err(e) => warn!(container_id = id, error = %e, "Failed to remove unstartable sandbox"),
    }
}

/// Docker-safe unique name: `<prefix>-<language>-<8 hex chars>`.
fn container_name(prefix: &str, language: &str) -> String {
    let language: String = language
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{language}-{}", &suffix[..8])
}
