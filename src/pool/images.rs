//! Pre-pulling the images every configured language runs in.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::PoolManager;
use crate::context::CallContext;
use crate::runtime::RuntimeError;

/// Result of pulling one image.
#[derive(Debug, Serialize)]
pub struct PullOutcome {
    /// Image reference that was pulled.
    pub image: String,
    /// Languages that run in this image.
    pub languages: Vec<String>,
    /// Pull result; failures are reported, not fatal.
    #[serde(serialize_with = "serialize_result")]
    pub result: Result<(), RuntimeError>,
}

impl PullOutcome {
    /// True when the image is available.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

fn serialize_result<S: serde::Serializer>(
    result: &Result<(), RuntimeError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match result {
        Ok(()) => serializer.serialize_none(),
        Err(e) => serializer.serialize_some(&e.to_string()),
    }
}

impl PoolManager {
    /// Pulls every distinct image concurrently, skipping images already present.
    ///
    /// Failures are logged and reported, never fatal: starting a sandbox from a
    /// missing image fails later on its own.
    pub async fn pull_images(&self, ctx: &CallContext) -> Vec<PullOutcome> {
        let images = self.languages.images();
        info!(images = images.len(), "Pulling sandbox images");

        let mut tasks = JoinSet::new();
        for (image, languages) in images {
            let runtime = Arc::clone(&self.runtime);
            let ctx = ctx.child();
            let image = image.to_string();
            let languages: Vec<String> = languages.into_iter().map(str::to_string).collect();
            tasks.spawn(async move {
                let result = tokio::select! {
                    biased;
                    reason = ctx.done() => {
                        Err(RuntimeError::container_failed("pull", reason.to_string()))
                    }
                    pulled = runtime.pull_image(&image) => pulled,
                };
                PullOutcome {
                    image,
                    languages,
                    result,
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    match &outcome.result {
                        Ok(()) => info!(image = %outcome.image, "Image ready"),
                        Err(e) => warn!(
                            image = %outcome.image,
                            languages = ?outcome.languages,
                            error = %e,
                            "Failed to pull image"
                        ),
                    }
                    outcomes.push(outcome);
                }
                Err(e) => warn!(error = %e, "Image pull task panicked"),
            }
        }
        outcomes.sort_by(|a, b| a.image.cmp(&b.image));
        outcomes
    }
}
