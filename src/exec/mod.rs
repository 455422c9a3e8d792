//! Running one code snippet inside an acquired sandbox.
//!
//! The engine never owns a sandbox's lifecycle. It builds the language's
//! invocation, runs it under a deadline, and classifies what happened as an
//! [`ExecStatus`]; putting the sandbox back is the caller's job.

mod output;

pub use output::CapturedOutput;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::{CallContext, DoneReason};
use crate::language::Languages;
use crate::pool::Sandbox;
use crate::runtime::{RuntimeClient, RuntimeError};

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
    /// Exited 0, or the exit code could not be determined after output completed.
    Success,
    /// Exited non-zero.
    Failed {
        /// Exit code reported by the runtime.
        exit_code: i64,
        /// Everything written to stderr.
        stderr: String,
    },
    /// The execution context finished before the output stream did.
    TimedOut {
        /// Budget that actually applied: the exec timeout or the caller's
        /// earlier deadline.
        after: Duration,
        /// Whether the deadline passed or the caller cancelled.
        reason: DoneReason,
    },
    /// The output stream ended but the runtime still reports the process as
    /// running. The sandbox may still be busy with it.
    StillRunning,
    /// The language has no invocation; nothing was run.
    Rejected {
        /// Message for the submitter.
        reason: String,
    },
    /// The runtime refused to create or attach the exec session.
    Error {
        /// Runtime error text.
        message: String,
    },
}

impl ExecStatus {
    /// Short machine-readable name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timeout",
            Self::StillRunning => "running",
            Self::Rejected { .. } => "rejected",
            Self::Error { .. } => "error",
        }
    }
}

/// Result of one execution: captured stdout plus its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecReport {
    /// Language tag the code was submitted as.
    pub language: String,
    /// Sandbox the code ran in; `None` when rejected before touching one.
    pub sandbox_id: Option<String>,
    /// Everything written to stdout, partial on timeout.
    pub stdout: String,
    /// How the run ended.
    pub status: ExecStatus,
}

impl ExecReport {
    /// True when the process exited 0.
    pub fn is_success(&self) -> bool {
        self.status == ExecStatus::Success
    }

    /// True when the run was cut short by a deadline or cancellation.
    pub fn is_timeout(&self) -> bool {
        matches!(self.status, ExecStatus::TimedOut { .. })
    }

    /// True when a process may still be running inside the sandbox.
    pub fn needs_reset(&self) -> bool {
        matches!(
            self.status,
            ExecStatus::TimedOut { .. } | ExecStatus::StillRunning
        )
    }

    /// Message to relay to whoever submitted the code, `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match &self.status {
            ExecStatus::Success => None,
            ExecStatus::Failed { exit_code, stderr } => {
                let mut combined = self.stdout.clone();
                if !stderr.is_empty() {
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str("Stderr:\n");
                    combined.push_str(stderr);
                }
                Some(format!("execution failed (exit {exit_code}):\n{combined}"))
            }
            ExecStatus::TimedOut {
                after,
                reason: DoneReason::DeadlineExceeded,
            } => Some(format!("Execution timed out after {after:?}")),
            ExecStatus::TimedOut {
                reason: DoneReason::Cancelled,
                ..
            } => Some("Execution cancelled".to_string()),
            ExecStatus::StillRunning => {
                Some("Execution output ended while the process was still running".to_string())
            }
            ExecStatus::Rejected { reason } => Some(reason.clone()),
            ExecStatus::Error { message } => Some(message.clone()),
        }
    }
}

/// Runs code in sandboxes through a [`RuntimeClient`].
pub struct ExecutionEngine {
    runtime: Arc<dyn RuntimeClient>,
    languages: Arc<Languages>,
    exec_timeout: Duration,
}

impl ExecutionEngine {
    /// Creates an engine that bounds every run by `exec_timeout`.
    pub fn new(runtime: Arc<dyn RuntimeClient>, languages: Arc<Languages>, exec_timeout: Duration) -> Self {
        Self {
            runtime,
            languages,
            exec_timeout,
        }
    }

    /// Per-execution time limit.
    pub fn exec_timeout(&self) -> Duration {
        self.exec_timeout
    }

    /// Runs `code` as `language` inside `sandbox`.
    ///
    /// Returns no later than `exec_timeout` after the call (or `ctx`'s own
    /// deadline, if sooner). On timeout the process inside the sandbox is
    /// abandoned, not killed.
    pub async fn execute(
        &self,
        ctx: &CallContext,
        sandbox: &Sandbox,
        language: &str,
        code: &str,
    ) -> ExecReport {
        let Some(command) = self.languages.invocation(language, code) else {
            warn!(%language, "Rejecting unsupported language");
            return ExecReport {
                language: language.to_string(),
                sandbox_id: None,
                stdout: String::new(),
                status: ExecStatus::Rejected {
                    reason: format!("Unsupported language: {language}"),
                },
            };
        };

        let started = Instant::now();
        let ctx = ctx.child_with_timeout(self.exec_timeout);
        let budget = applied_budget(&ctx, started, self.exec_timeout);
        let id = sandbox.id();
        debug!(container_id = id, %language, "Executing code");

        let mut output = CapturedOutput::default();
        let session = tokio::select! {
            biased;
            reason = ctx.done() => Err(reason),
            session = self.run(id, command, &mut output) => Ok(session),
        };

        let status = match session {
            Err(reason) => {
                warn!(container_id = id, %language, %reason, "Execution did not finish in time");
                ExecStatus::TimedOut {
                    after: budget,
                    reason,
                }
            }
            Ok(Err(e)) => {
                warn!(container_id = id, %language, error = %e, "Could not run exec session");
                ExecStatus::Error {
                    message: e.to_string(),
                }
            }
            Ok(Ok(exec_id)) => self.classify(&ctx, id, &exec_id, &output).await,
        };

        if status == ExecStatus::Success {
            info!(container_id = id, %language, "Execution succeeded");
        }
        ExecReport {
            language: language.to_string(),
            sandbox_id: Some(id.to_string()),
            stdout: output.stdout(),
            status,
        }
    }

    /// Creates the exec session and drains its output. Returns the exec id.
    async fn run(
        &self,
        id: &str,
        command: Vec<String>,
        output: &mut CapturedOutput,
    ) -> Result<String, RuntimeError> {
        let exec_id = self.runtime.exec_create(id, command).await?;
        let mut stream = self.runtime.exec_attach(&exec_id).await?;
        if let Err(e) = output.drain(&mut stream).await {
            warn!(container_id = id, error = %e, "Output stream ended early");
        }
        Ok(exec_id)
    }

    async fn classify(
        &self,
        ctx: &CallContext,
        id: &str,
        exec_id: &str,
        output: &CapturedOutput,
    ) -> ExecStatus {
        let inspected = tokio::select! {
            biased;
            reason = ctx.done() => Err(RuntimeError::exec_failed("inspect", reason.to_string())),
            inspected = self.runtime.exec_inspect(exec_id) => inspected,
        };

        let exit_code = match inspected {
            Ok(Some(code)) => code,
            Ok(None) => {
                warn!(container_id = id, exec_id, "Exec still running after output closed");
                return ExecStatus::StillRunning;
            }
            Err(e) => {
                warn!(container_id = id, exec_id, error = %e, "Exec inspect failed");
                0
            }
        };

        let stderr = output.stderr();
        if exit_code != 0 {
            info!(container_id = id, exit_code, "Execution failed");
            return ExecStatus::Failed { exit_code, stderr };
        }
        if !stderr.is_empty() {
            warn!(container_id = id, %stderr, "Stderr output on exit 0");
        }
        ExecStatus::Success
    }
}

/// Time the run was actually given: the exec timeout, or less when the
/// caller's deadline came first. Rounded to whole milliseconds.
fn applied_budget(ctx: &CallContext, started: Instant, exec_timeout: Duration) -> Duration {
    let Some(deadline) = ctx.deadline() else {
        return exec_timeout;
    };
    let remaining = deadline.saturating_duration_since(started).min(exec_timeout);
    let millis = (remaining.as_micros() + 500) / 1000;
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}
