//! Run a file of jobs concurrently against one pool.
//!
//! Input is JSON lines, one `{"language": ..., "code": ...}` object per line.
//! All jobs are submitted at once and contend for sandboxes; output is one
//! JSON report per job, in input order.

use anyhow::{Context, Result};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use sandpool::{CallContext, Config, ExecReport, PoolError};

/// One line of the input file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Job {
    pub language: String,
    pub code: String,
}

/// One line of output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub index: usize,
    pub language: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    pub stdout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn new(index: usize, language: &str, submitted: Result<ExecReport, PoolError>) -> Self {
        match submitted {
            Ok(report) => Self {
                index,
                language: language.to_string(),
                status: report.status.label().to_string(),
                error: report.error_message(),
                sandbox_id: report.sandbox_id,
                stdout: report.stdout,
            },
            Err(e) => Self {
                index,
                language: language.to_string(),
                status: if e.is_timeout() { "acquire_timeout" } else { "error" }.to_string(),
                sandbox_id: None,
                stdout: String::new(),
                error: Some(e.to_string()),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Parse JSON lines, skipping blank lines
pub fn parse_jobs(content: &str) -> Result<Vec<Job>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid job on line {}", n + 1))
        })
        .collect()
}

/// Entry point: returns whether every job succeeded
pub async fn run(config: &Config, file: &Path) -> Result<bool> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read job file: {}", file.display()))?;
    let jobs = parse_jobs(&content)?;
    if jobs.is_empty() {
        return Ok(true);
    }

    let ctx = CallContext::background();
    super::cancel_on_ctrl_c(&ctx);
    let session = super::boot(config, &ctx).await?;

    let submissions = jobs.iter().enumerate().map(|(index, job)| {
        let session = &session;
        let ctx = &ctx;
        async move {
            let submitted = session
                .pool
                .submit(ctx, &session.engine, &job.language, &job.code)
                .await;
            JobResult::new(index, &job.language, submitted)
        }
    });
    let results = join_all(submissions).await;
    super::teardown(&session.pool).await;

    let mut all_ok = true;
    for result in &results {
        all_ok &= result.is_success();
        println!("{}", serde_json::to_string(result)?);
    }
    Ok(all_ok)
}
