//! Pre-pull every configured language image.

use anyhow::{bail, Result};
use colored::Colorize;
use std::fmt::Write;

use sandpool::pool::PullOutcome;
use sandpool::{CallContext, Config};

/// Format pull results, one line per image
pub fn format_outcomes(outcomes: &[PullOutcome]) -> String {
    let mut out = String::new();
    for outcome in outcomes {
        let languages = outcome.languages.join(", ");
        match &outcome.result {
            Ok(()) => {
                let _ = writeln!(
                    &mut out,
                    "{} {} {}",
                    "✓".green(),
                    outcome.image,
                    format!("({languages})").dimmed()
                );
            }
            Err(e) => {
                let _ = writeln!(
                    &mut out,
                    "{} {} {}\n    {}",
                    "✗".red(),
                    outcome.image,
                    format!("({languages})").dimmed(),
                    e.to_string().red()
                );
            }
        }
    }
    out
}

/// Entry point: pulls all images and fails if any pull failed
pub async fn run(config: &Config) -> Result<()> {
    let (pool, _, _) = super::connect(config).await?;

    let ctx = CallContext::background();
    super::cancel_on_ctrl_c(&ctx);
    let outcomes = pool.pull_images(&ctx).await;
    pool.close().await;

    print!("{}", format_outcomes(&outcomes));
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        bail!("{failed} of {} images failed to pull", outcomes.len());
    }
    Ok(())
}
