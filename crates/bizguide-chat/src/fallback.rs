//! Single blocking retry after a failed or empty stream.

use std::sync::Arc;

use bizguide_core::types::GenerationRequest;

use crate::error::{FailureKind, PipelineError};
use crate::markup::assistant_markdown;
use crate::output::{DebugLog, OutputRegion};
use crate::pipeline::GenerationPipeline;

/// Result of a fallback attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    /// The blocking call produced an answer.
    Recovered(String),
    /// The failure was logged only; nothing was rendered.
    Suppressed,
    /// Nothing was produced by either path; the apology was rendered.
    Apology(String),
}

pub struct FallbackController {
    pipeline: Arc<dyn GenerationPipeline>,
    apology: String,
}

impl FallbackController {
    pub fn new(pipeline: Arc<dyn GenerationPipeline>, apology: impl Into<String>) -> Self {
        Self {
            pipeline,
            apology: apology.into(),
        }
    }

    pub fn apology(&self) -> &str {
        &self.apology
    }

    /// Issue one blocking call for `request` and render its answer.
    ///
    /// `produced` tells whether any answer text already exists from the
    /// streaming attempt; the apology is only used when it does not. Never
    /// retries.
    pub async fn recover(
        &self,
        request: &GenerationRequest,
        region: &dyn OutputRegion,
        produced: bool,
        debug_log: &DebugLog,
    ) -> FallbackOutcome {
        let answer = self.pipeline.invoke(request).await.and_then(|result| {
            result
                .generation()
                .filter(|text| !text.trim().is_empty())
                .map(str::to_string)
                .ok_or(PipelineError::MissingGeneration)
        });

        match answer {
            Ok(text) => {
                if let Err(e) = region.markdown(&assistant_markdown(&text)) {
                    tracing::debug!(error = %e, "Fallback answer not rendered");
                }
                tracing::info!(chars = text.len(), "Fallback recovered an answer");
                FallbackOutcome::Recovered(text)
            }
            Err(e) if e.kind() == FailureKind::NonCriticalFormatAnomaly => {
                tracing::debug!(error = %e, "Ignoring transport format anomaly in fallback");
                debug_log.line(format!("fallback: {}", e));
                FallbackOutcome::Suppressed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Fallback generation failed");
                debug_log.line(format!("fallback: {}", e));
                if produced {
                    return FallbackOutcome::Suppressed;
                }
                if let Err(render) = region.error(&self.apology) {
                    tracing::debug!(error = %render, "Apology not rendered");
                }
                FallbackOutcome::Apology(self.apology.clone())
            }
        }
    }
}
