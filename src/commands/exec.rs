//! Run one snippet in a freshly booted pool.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::fs;
use std::path::PathBuf;

use sandpool::{CallContext, Config, ExecReport, ExecStatus};

/// Where the code to run comes from.
#[derive(Debug, Clone)]
pub enum Source {
    Inline(String),
    File(PathBuf),
}

impl Source {
    fn read(&self) -> Result<String> {
        match self {
            Self::Inline(code) => Ok(code.clone()),
            Self::File(path) => fs::read_to_string(path)
                .with_context(|| format!("Failed to read code file: {}", path.display())),
        }
    }
}

/// Format an execution report for the terminal
pub fn format_report(report: &ExecReport) -> String {
    let mut out = String::new();
    if let Some(id) = &report.sandbox_id {
        let _ = writeln!(&mut out, "{} {}", "Sandbox:".dimmed(), short_id(id).dimmed());
    }
    if !report.stdout.is_empty() {
        let _ = write!(&mut out, "{}", report.stdout);
        if !report.stdout.ends_with('\n') {
            out.push('\n');
        }
    }

    match &report.status {
        ExecStatus::Success => {
            let _ = writeln!(&mut out, "{} {}", "✓".green(), "success".green());
        }
        ExecStatus::Failed { exit_code, stderr } => {
            if !stderr.is_empty() {
                let _ = writeln!(&mut out, "{}\n{}", "Stderr:".yellow(), stderr.trim_end());
            }
            let _ = writeln!(&mut out, "{} exited with code {}", "✗".red(), exit_code);
        }
        ExecStatus::TimedOut { .. }
        | ExecStatus::StillRunning
        | ExecStatus::Rejected { .. }
        | ExecStatus::Error { .. } => {
            let message = report.error_message().unwrap_or_default();
            let _ = writeln!(&mut out, "{} {}", "✗".red(), message.red());
        }
    }
    out
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Entry point: boots the pool, runs `source` once and tears the pool down.
/// Returns whether the code ran successfully.
pub async fn run(config: &Config, language: &str, source: Source) -> Result<bool> {
    if !config.languages.contains_key(language) {
        let known: Vec<&str> = config.languages.keys().map(String::as_str).collect();
        bail!(
            "Unsupported language: {language} (configured: {})",
            known.join(", ")
        );
    }
    let code = source.read()?;

    let ctx = CallContext::background();
    super::cancel_on_ctrl_c(&ctx);

    let session = super::boot(config, &ctx).await?;
    let result = session
        .pool
        .submit(&ctx, &session.engine, language, &code)
        .await;
    super::teardown(&session.pool).await;

    let report = result.with_context(|| format!("Failed to run {language} code"))?;
    print!("{}", format_report(&report));
    Ok(report.is_success())
}
