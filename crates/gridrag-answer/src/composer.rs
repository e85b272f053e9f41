use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use gridrag_core::config::{BackendSettings, ComposerSettings, PolicySettings};
use gridrag_core::error::{Backend, CompositionError};
use gridrag_core::traits::Generator;
use gridrag_core::types::{Answer, AnswerMetadata, Candidate, GenerationRequest};

use crate::citations::{self, CitationCheck};
use crate::context::{self, AssembledContext};
use crate::policy::{self, RolePolicy};
use crate::prompt;
use crate::risk;

/// Turns ranked candidates into a grounded, cited answer.
///
/// Every refusal (role gate, admission) happens before the generator is
/// called.
pub struct AnswerComposer {
    generator: Arc<dyn Generator>,
    policy: RolePolicy,
    settings: ComposerSettings,
    generation_timeout: Duration,
}

impl AnswerComposer {
    pub fn new(generator: Arc<dyn Generator>, policy: RolePolicy, settings: ComposerSettings, generation_timeout: Duration) -> Self {
        Self { generator, policy, settings, generation_timeout }
    }

    pub fn from_settings(
        generator: Arc<dyn Generator>,
        composer: &ComposerSettings,
        backends: &BackendSettings,
        policy: &PolicySettings,
    ) -> Self {
        Self::new(generator, RolePolicy::from_settings(policy), composer.clone(), backends.generation_timeout())
    }

    pub async fn compose(&self, query: &str, candidates: &[Candidate], role: &str) -> Result<Answer, CompositionError> {
        let risk_level = risk::classify(query);
        self.policy.check(role, policy::query_category(risk_level))?;

        let admitted: Vec<Candidate> =
            candidates.iter().filter(|c| c.score >= self.settings.admission_threshold).cloned().collect();
        if admitted.is_empty() {
            let best_score = candidates.iter().map(|c| c.score).fold(0.0_f32, f32::max);
            info!(best_score, threshold = self.settings.admission_threshold, "no candidate admitted");
            return Err(CompositionError::InsufficientEvidence { best_score });
        }
        for candidate in &admitted {
            self.policy.check(role, &policy::authority_category(candidate.chunk.chunk.metadata.authority))?;
        }

        let ctx = context::assemble(&admitted, self.settings.context_token_budget);
        if ctx.dropped > 0 {
            debug!(dropped = ctx.dropped, tokens = ctx.tokens, "context budget reached");
        }
        if ctx.tokens > self.settings.context_token_budget {
            warn!(tokens = ctx.tokens, budget = self.settings.context_token_budget, "top chunk alone exceeds context budget");
        }

        let request = GenerationRequest {
            instructions: prompt::instructions(risk_level),
            context: ctx.text.clone(),
            query: query.to_string(),
        };
        let text = match tokio::time::timeout(self.generation_timeout, self.generator.generate(&request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(generator = self.generator.name(), error = %e, "generation failed");
                return Err(CompositionError::GenerationUnavailable {
                    backend: Backend::Generation,
                    reason: e.to_string(),
                    timed_out: false,
                });
            }
            Err(_) => {
                warn!(generator = self.generator.name(), timeout_ms = self.generation_timeout.as_millis() as u64, "generation timed out");
                return Err(CompositionError::GenerationUnavailable {
                    backend: Backend::Generation,
                    reason: format!("no response within {} ms", self.generation_timeout.as_millis()),
                    timed_out: true,
                });
            }
        };

        let text = text.trim().to_string();
        let check = citations::validate(&text, &ctx.sources);
        let mut warnings = check.warnings.clone();
        if text.is_empty() {
            warnings.push("generator returned an empty answer".to_string());
        }
        let confidence = self.confidence(&text, &ctx, &check);
        if !warnings.is_empty() {
            warn!(findings = warnings.len(), confidence, "citation validation findings");
        }

        Ok(Answer {
            text,
            citations: check.citations,
            confidence,
            risk_level,
            degraded: false,
            warnings,
            metadata: AnswerMetadata {
                candidates_retrieved: candidates.len(),
                candidates_admitted: admitted.len(),
                ..AnswerMetadata::default()
            },
        })
    }

    fn confidence(&self, text: &str, ctx: &AssembledContext, check: &CitationCheck) -> f32 {
        if text.is_empty() || check.cited_sources.is_empty() {
            return 0.0;
        }
        let sum: f32 = check.cited_sources.iter().map(|&i| ctx.sources[i].candidate.score).sum();
        let mean = (sum / check.cited_sources.len() as f32).clamp(0.0, 1.0);
        if check.is_clean() {
            mean
        } else {
            mean.min(self.settings.low_confidence_cap)
        }
    }
}
