//! Extension hooks for integrating the report pipeline into a hosting service.
//!
//! The pipeline stays storage-agnostic. Callers can inject:
//! - Per-stage side effects (e.g., progress streaming)
//! - Persistence of the finished report (e.g., an encrypted report table)

use async_trait::async_trait;
use uuid::Uuid;

use super::types::{FeedbackReport, ProgressEvent};

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("{0}")]
    Message(String),
}

/// Called once per stage, after the stage completes or is skipped.
///
/// Errors are logged by the orchestrator and never abort the run.
#[async_trait]
pub trait StageObserver: Send + Sync {
    async fn on_stage(&self, event: &ProgressEvent) -> Result<(), ObserverError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl StageObserver for NoopObserver {
    async fn on_stage(&self, _event: &ProgressEvent) -> Result<(), ObserverError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("{0}")]
    Message(String),
}

/// Stores a finished report and returns the stored record's identifier.
#[async_trait]
pub trait ReportPersister: Send + Sync {
    async fn persist(
        &self,
        run_id: Uuid,
        user_id: Option<&str>,
        report: &FeedbackReport,
    ) -> Result<String, PersistError>;
}

/// Stores nothing; the run id stands in as the record id.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersister;

#[async_trait]
impl ReportPersister for NoopPersister {
    async fn persist(
        &self,
        run_id: Uuid,
        _user_id: Option<&str>,
        _report: &FeedbackReport,
    ) -> Result<String, PersistError> {
        Ok(run_id.to_string())
    }
}
