//! Usage accounting for generation calls.
//!
//! The gateway reports every attempt through a [`UsageSink`], so billing and
//! quota bookkeeping stay with the hosting service. The CLI logs records with
//! [`TracingUsageSink`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// One provider attempt, successful or not.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    pub provider: &'static str,
    pub endpoint: &'static str,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Input tokens the provider served from its prompt cache.
    pub cached_input_tokens: Option<u32>,
    /// Whether the request carried a prompt-cache hint.
    pub cache_hinted: bool,
    /// Cost in nanodollars (1e-9 USD).
    pub cost_nanodollars: i64,
    /// Opaque id of the user the run belongs to.
    pub user_id: Option<String>,
    pub run_id: Option<Uuid>,
    pub latency_ms: u64,
    pub status: CallStatus,
    pub error_code: Option<&'static str>,
    /// Stage tag, e.g. `report::emotion`.
    pub caller: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    pub fn new(
        provider: &'static str,
        endpoint: &'static str,
        model: impl Into<String>,
        caller: &'static str,
    ) -> Self {
        Self {
            provider,
            endpoint,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cached_input_tokens: None,
            cache_hinted: false,
            cost_nanodollars: 0,
            user_id: None,
            run_id: None,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, input: u32, output: u32, cached: Option<u32>) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self.cached_input_tokens = cached;
        self
    }

    pub fn cost(mut self, nanodollars: i64) -> Self {
        self.cost_nanodollars = nanodollars;
        self
    }

    pub fn attributed(mut self, user_id: Option<String>, run_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self.run_id = run_id;
        self
    }

    pub fn cache_hinted(mut self, hinted: bool) -> Self {
        self.cache_hinted = hinted;
        self
    }

    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: &'static str) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code);
        self
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Receives one record per provider attempt. Fire-and-forget: implementations
/// log their own failures instead of returning them.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: ProviderCallRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Emits one structured `tracing` event per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        tracing::info!(
            target: "daily_feedback::usage",
            provider = record.provider,
            model = %record.model,
            caller = record.caller,
            status = record.status.as_str(),
            error_code = record.error_code.unwrap_or(""),
            tokens = record.total_tokens(),
            cached_tokens = record.cached_input_tokens.unwrap_or(0),
            cache_hinted = record.cache_hinted,
            cost_nanos = record.cost_nanodollars,
            user_id = record.user_id.as_deref().unwrap_or(""),
            run_id = %record.run_id.map(|id| id.to_string()).unwrap_or_default(),
            latency_ms = record.latency_ms,
            "provider call"
        );
    }
}
