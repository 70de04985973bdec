//! Pipeline orchestration: seven stages, strictly in order.
//!
//! Each stage resolves its contract, consults the fingerprint cache, and only
//! on a miss calls the generation service. At most one call is in flight per
//! run; concurrent fan-out across stages trips provider rate limits. Runs that
//! share an orchestrator queue on a per-fingerprint lock, so identical stages
//! in flight at once are generated once and served from cache to the rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{ArtifactCache, CacheError, Fingerprint};
use crate::config::{OutputTokenLimits, PipelineConfig};
use crate::gateway::{Attribution, ChatGateway};
use crate::prompts::PromptInstance;
use crate::schema::{self, SchemaContract};

use super::hooks::StageObserver;
use super::invoke::{InvocationAdapter, InvocationError, InvokeOptions};
use super::stages::{StageDefinition, STAGES};
use super::types::{
    Artifact, FeedbackReport, PipelineRun, ProgressEvent, StageId, StageOutput, StageStatus,
    TokenUsage,
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no records found for {date}")]
    NoRecordsForDate { date: NaiveDate },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: StageId,
        #[source]
        source: InvocationError,
    },

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl PipelineError {
    /// HTTP-equivalent status for the hosting service.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::NoRecordsForDate { .. } => 404,
            PipelineError::Stage {
                source: InvocationError::QuotaExceeded { .. },
                ..
            } => 429,
            _ => 500,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::Stage {
                source: InvocationError::QuotaExceeded { retry_after },
                ..
            } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<StageId> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// What one stage produced and how.
struct StageResult {
    output: StageOutput,
    status: StageStatus,
    usage: Option<TokenUsage>,
}

pub struct Orchestrator {
    adapter: InvocationAdapter,
    cache: Arc<dyn ArtifactCache>,
    max_output_tokens: OutputTokenLimits,
    /// Fingerprints with a lookup-generate-store sequence under way.
    in_flight: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(adapter: InvocationAdapter, cache: Arc<dyn ArtifactCache>) -> Self {
        Self {
            adapter,
            cache,
            max_output_tokens: OutputTokenLimits::default(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        gateway: Arc<dyn ChatGateway>,
        cache: Arc<dyn ArtifactCache>,
    ) -> Self {
        let adapter = InvocationAdapter::new(gateway, config.model.clone())
            .with_fallback(config.fallback_model.clone())
            .with_temperature(config.temperature)
            .with_call_timeout(config.call_timeout());
        Self::new(adapter, cache).with_output_limits(config.max_output_tokens)
    }

    pub fn with_output_limits(mut self, limits: OutputTokenLimits) -> Self {
        self.max_output_tokens = limits;
        self
    }

    pub fn total_stages(&self) -> usize {
        STAGES.len()
    }

    /// Run every stage of `run` and assemble the composite report.
    ///
    /// Any stage failure aborts the run; artifacts already stored stay in the
    /// cache for a later retry.
    pub async fn run(
        &self,
        mut run: PipelineRun,
        observer: &dyn StageObserver,
    ) -> Result<FeedbackReport, PipelineError> {
        if run.records.is_empty() {
            return Err(PipelineError::NoRecordsForDate { date: run.date });
        }

        info!(
            run_id = %run.id,
            date = %run.date,
            tier = run.tier.as_str(),
            records = run.records.len(),
            "report run started"
        );

        let total = STAGES.len();

        for def in STAGES.iter() {
            let started = Instant::now();
            let result = match self.run_stage(def, &run).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(run_id = %run.id, stage = %def.id, error = %err, "report run aborted");
                    return Err(err);
                }
            };
            run.record_output(def.id, result.output);

            let event = ProgressEvent {
                stage_index: run.completed_count,
                total_stages: total,
                stage_name: def.id,
                status: result.status,
                timing_ms: Some(started.elapsed().as_millis() as u64),
                token_usage: result.usage,
            };
            if let Err(err) = observer.on_stage(&event).await {
                warn!(stage = %def.id, error = %err, "stage observer failed");
            }
        }

        info!(run_id = %run.id, "report run finished");
        Ok(FeedbackReport::from_run(&run))
    }

    async fn run_stage(
        &self,
        def: &StageDefinition,
        run: &PipelineRun,
    ) -> Result<StageResult, PipelineError> {
        if def.should_skip(&run.records) {
            debug!(stage = %def.id, "no matching records, skipping");
            return Ok(StageResult {
                output: StageOutput::Skipped,
                status: StageStatus::Skipped,
                usage: None,
            });
        }

        let contract = def.schema_source().resolve(run.tier);
        let prior: Vec<(StageId, Option<&Artifact>)> = run
            .stage_outputs
            .iter()
            .map(|(id, output)| (*id, output.artifact()))
            .collect();
        let prompt = def.build_prompt(run, &prior);
        let fingerprint = Fingerprint::result(def.id, &prompt.system, &prompt.user, run.tier);

        let slot = self.claim(&fingerprint).await;
        let outcome = {
            let _held = slot.lock().await;
            self.reuse_or_generate(def, run, &prompt, &contract, &fingerprint)
                .await
        };
        self.release(&fingerprint, slot).await;
        outcome
    }

    async fn reuse_or_generate(
        &self,
        def: &StageDefinition,
        run: &PipelineRun,
        prompt: &PromptInstance,
        contract: &SchemaContract,
        fingerprint: &Fingerprint,
    ) -> Result<StageResult, PipelineError> {
        if let Some(artifact) = self.cache.lookup(fingerprint).await? {
            info!(stage = %def.id, fingerprint = fingerprint.short(), cached = true, "stage complete");
            return Ok(StageResult {
                output: StageOutput::Generated(artifact),
                status: StageStatus::Cached,
                usage: None,
            });
        }

        let instruction_fingerprint = Fingerprint::instruction(def.id, &prompt.system);
        let mut attribution = Attribution::new(def.caller).with_run(run.id);
        if let Some(user_id) = &run.user_id {
            attribution = attribution.with_user(user_id.clone());
        }
        let options = InvokeOptions {
            cache_hint: Some(instruction_fingerprint.to_string()),
            max_tokens: Some(self.max_output_tokens.for_tier(run.tier)),
            attribution,
        };

        let invocation = self
            .adapter
            .invoke(&prompt.system, &prompt.user, contract, options)
            .await
            .map_err(|source| PipelineError::Stage {
                stage: def.id,
                source,
            })?;

        let artifact = schema::redact(invocation.artifact, def.id, run.tier);
        self.cache.store(fingerprint, &artifact).await?;

        info!(
            stage = %def.id,
            fingerprint = fingerprint.short(),
            cached = false,
            model = %invocation.model,
            shape = ?invocation.shape,
            latency_ms = invocation.latency.as_millis() as u64,
            input_tokens = invocation.usage.input_tokens,
            output_tokens = invocation.usage.output_tokens,
            "stage complete"
        );

        Ok(StageResult {
            output: StageOutput::Generated(artifact),
            status: StageStatus::Generated,
            usage: Some(invocation.usage),
        })
    }

    async fn claim(&self, fingerprint: &Fingerprint) -> Arc<Mutex<()>> {
        self.in_flight
            .lock()
            .await
            .entry(fingerprint.clone())
            .or_default()
            .clone()
    }

    /// Drop the slot once no other run holds or waits on it.
    async fn release(&self, fingerprint: &Fingerprint, slot: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        // The map's reference plus ours.
        if Arc::strong_count(&slot) <= 2 {
            in_flight.remove(fingerprint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        assert_eq!(PipelineError::NoRecordsForDate { date }.status_code(), 404);

        let quota = PipelineError::Stage {
            stage: StageId::Emotion,
            source: InvocationError::QuotaExceeded {
                retry_after: Duration::from_secs(42),
            },
        };
        assert_eq!(quota.status_code(), 429);
        assert_eq!(quota.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(quota.stage(), Some(StageId::Emotion));

        let malformed = PipelineError::Stage {
            stage: StageId::Daily,
            source: InvocationError::MalformedPayload("x".into()),
        };
        assert_eq!(malformed.status_code(), 500);
        assert_eq!(malformed.retry_after(), None);
    }
}
