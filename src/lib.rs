#![forbid(unsafe_code)]

//! # daily-feedback
//!
//! Turns a day of journal records into a set of structured feedback reports.
//!
//! Seven stages (summary, daily, emotion, vision, insight, feedback, closing)
//! each ask a generation model for a JSON object under a strict, tier-aware
//! schema. Results are cached by a content fingerprint so repeated runs over
//! the same records cost nothing, premium-only fields are redacted for
//! standard-tier users regardless of what the model returned, and progress is
//! streamed to a live client one frame per stage.

pub mod cache;
pub mod config;
pub mod gateway;
pub mod prompts;
pub mod report;
pub mod schema;

pub use cache::{ArtifactCache, CacheError, Fingerprint, MemoryArtifactCache};
pub use config::{ConfigError, PipelineConfig};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use report::{
    stream_run, FeedbackReport, Orchestrator, PipelineError, PipelineRun, ProgressEmitter,
    ProgressEvent, Record, RecordType, StageId, Tier,
};
pub use schema::{SchemaContract, SchemaSource};
