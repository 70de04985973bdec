//! Daily feedback report pipeline.
//!
//! Turns one day of journal records into seven schema-validated reports:
//! - Fingerprint-cached, so an unchanged stage never costs a second call
//! - Strictly sequential, one generation call in flight per run
//! - Tier-shaped, with premium-only fields redacted for standard users

pub mod hooks;
pub mod invoke;
pub mod orchestrator;
pub mod progress;
pub mod stages;
pub mod types;

// Re-export main entry points
pub use hooks::{
    NoopObserver, NoopPersister, ObserverError, PersistError, ReportPersister, StageObserver,
};
pub use invoke::{
    InvocationAdapter, InvocationError, InvokeOptions, ResponseShape, UnavailableCause,
};
pub use orchestrator::{Orchestrator, PipelineError};
pub use progress::{
    stream_run, ChannelTransport, CompletedRun, JsonlTransport, ProgressEmitter, ProgressFrame,
    ProgressTransport, RunError, TransportError,
};
pub use stages::{stage, StageDefinition, STAGES};
pub use types::*;
