//! Progress streaming to a live client.
//!
//! The emitter turns stage completions into an ordered frame stream and ends
//! it with exactly one terminal frame. After that frame, or after the
//! transport fails, every call is a silent no-op: the peer may already be gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::hooks::{ObserverError, PersistError, ReportPersister, StageObserver};
use super::orchestrator::{Orchestrator, PipelineError};
use super::types::{FeedbackReport, PipelineRun, ProgressEvent};

/// One frame on the wire, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressFrame {
    Progress(ProgressEvent),
    Complete {
        report: FeedbackReport,
        record_id: String,
    },
    Error {
        message: String,
    },
}

impl ProgressFrame {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressFrame::Progress(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed by peer")]
    Closed,
    #[error("transport write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait ProgressTransport: Send + Sync {
    async fn send(&self, frame: &ProgressFrame) -> Result<(), TransportError>;
}

/// Hands frames to an in-process consumer, e.g. an SSE response handler.
pub struct ChannelTransport {
    tx: mpsc::Sender<ProgressFrame>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressTransport for ChannelTransport {
    async fn send(&self, frame: &ProgressFrame) -> Result<(), TransportError> {
        self.tx
            .send(frame.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Writes one JSON object per line.
pub struct JsonlTransport<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonlTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ProgressTransport for JsonlTransport<W> {
    async fn send(&self, frame: &ProgressFrame) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

pub struct ProgressEmitter {
    transport: Arc<dyn ProgressTransport>,
    write_timeout: Duration,
    finished: AtomicBool,
    disconnected: AtomicBool,
}

impl ProgressEmitter {
    pub fn new(transport: Arc<dyn ProgressTransport>, write_timeout: Duration) -> Self {
        Self {
            transport,
            write_timeout,
            finished: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub async fn notify(&self, event: ProgressEvent) {
        if self.is_finished() {
            debug!(stage = %event.stage_name, "progress after terminal frame ignored");
            return;
        }
        self.write(ProgressFrame::Progress(event)).await;
    }

    pub async fn complete(&self, report: FeedbackReport, record_id: String) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.write(ProgressFrame::Complete { report, record_id })
            .await;
    }

    pub async fn fail(&self, message: impl Into<String>) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.write(ProgressFrame::Error {
            message: message.into(),
        })
        .await;
    }

    async fn write(&self, frame: ProgressFrame) {
        if self.is_disconnected() {
            debug!(terminal = frame.is_terminal(), "transport gone, frame dropped");
            return;
        }
        let failure = match timeout(self.write_timeout, self.transport.send(&frame)).await {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("write timed out after {:?}", self.write_timeout),
        };
        warn!(error = %failure, "progress transport failed, dropping further frames");
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StageObserver for ProgressEmitter {
    async fn on_stage(&self, event: &ProgressEvent) -> Result<(), ObserverError> {
        self.notify(event.clone()).await;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to persist report: {0}")]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub report: FeedbackReport,
    pub record_id: String,
}

/// Drive one run end to end: stages, persistence, then exactly one terminal
/// frame on `emitter`.
pub async fn stream_run(
    orchestrator: &Orchestrator,
    run: PipelineRun,
    emitter: &ProgressEmitter,
    persister: &dyn ReportPersister,
) -> Result<CompletedRun, RunError> {
    let run_id = run.id;
    let user_id = run.user_id.clone();

    let report = match orchestrator.run(run, emitter).await {
        Ok(report) => report,
        Err(err) => {
            emitter.fail(err.to_string()).await;
            return Err(err.into());
        }
    };

    let record_id = match persister
        .persist(run_id, user_id.as_deref(), &report)
        .await
    {
        Ok(id) => id,
        Err(err) => {
            emitter.fail(format!("failed to save report: {err}")).await;
            return Err(err.into());
        }
    };

    emitter.complete(report.clone(), record_id.clone()).await;
    Ok(CompletedRun { report, record_id })
}
