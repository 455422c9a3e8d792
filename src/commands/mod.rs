//! CLI command implementations.
//!
//! Each submodule implements one `sandpool` subcommand. Formatting is kept in
//! pure functions; booting and tearing down the pool lives here.

pub mod batch;
pub mod config;
pub mod exec;
pub mod pull;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use sandpool::{CallContext, Config, DockerRuntime, ExecutionEngine, Languages, PoolManager, RuntimeClient};

/// Loads the configuration and applies command-line overrides.
pub fn load_config(path: Option<&Path>, count: Option<usize>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Config::load(&cwd)?
        }
    };
    if let Some(count) = count {
        config.pool.count_per_language = count;
    }
    config.validate()?;
    Ok(config)
}

/// Connects to Docker and builds a pool manager without starting anything.
pub async fn connect(config: &Config) -> Result<(PoolManager, Arc<dyn RuntimeClient>, Arc<Languages>)> {
    let languages = Arc::new(Languages::from_config(&config.languages)?);
    let runtime: Arc<dyn RuntimeClient> = Arc::new(
        DockerRuntime::connect()
            .await
            .context("Failed to connect to Docker")?,
    );
    let pool = PoolManager::initialize(
        Arc::clone(&runtime),
        Arc::clone(&languages),
        config.pool.settings(),
    )?;
    Ok((pool, runtime, languages))
}

/// A started pool and the engine that runs code in it.
pub struct Session {
    pub pool: PoolManager,
    pub engine: ExecutionEngine,
}

/// Pulls images and starts the initial sandboxes.
///
/// If nothing starts, whatever was created is torn down before the error is returned.
pub async fn boot(config: &Config, ctx: &CallContext) -> Result<Session> {
    let (pool, runtime, languages) = connect(config).await?;

    pool.pull_images(ctx).await;
    if let Err(e) = pool
        .start_initial_containers(ctx, config.pool.count_per_language)
        .await
    {
        teardown(&pool).await;
        return Err(e).context("Failed to start sandbox pool");
    }

    let engine = ExecutionEngine::new(runtime, languages, pool.settings().exec_timeout);
    Ok(Session { pool, engine })
}

/// Removes every sandbox and closes the runtime connection.
pub async fn teardown(pool: &PoolManager) {
    let report = pool.cleanup_containers().await;
    if report.deadline_exceeded || report.failed > 0 {
        warn!(
            retired = report.retired,
            failed = report.failed,
            deadline_exceeded = report.deadline_exceeded,
            "Some sandboxes may have been left behind"
        );
    }
    pool.close().await;
}

/// Cancels `ctx` on Ctrl-C. Teardown is unaffected.
pub fn cancel_on_ctrl_c(ctx: &CallContext) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling pending work");
            ctx.cancel();
        }
    });
}
