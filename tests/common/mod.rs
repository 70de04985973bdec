#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use daily_feedback::gateway::{ChatGateway, ChatRequest, ChatResponse, FinishReason, ProviderError};
use daily_feedback::report::{
    ObserverError, ProgressEvent, Record, RecordType, StageId, StageObserver,
};
use serde_json::{json, Value};

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
}

pub fn record(record_type: RecordType, hhmm: &str, content: &str) -> Record {
    Record::new(
        format!("{record_type:?}-{hhmm}"),
        record_type,
        content,
        DateTime::parse_from_rfc3339(&format!("2025-01-10T{hhmm}:00+09:00")).unwrap(),
    )
}

pub fn every_type() -> Vec<Record> {
    vec![
        record(RecordType::Daily, "08:00", "walked to work"),
        record(RecordType::Emotion, "09:00", "anxious before the review"),
        record(RecordType::Dream, "07:00", "I was flying over the sea"),
        record(RecordType::Insight, "13:00", "short breaks help"),
        record(RecordType::Feedback, "21:00", "I rushed the last task"),
    ]
}

/// A value satisfying `schema`, with every nullable field populated.
pub fn sample_for(schema: &Value) -> Value {
    let ty = match &schema["type"] {
        Value::Array(types) => types.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    match ty.as_str() {
        Some("object") => {
            let mut out = serde_json::Map::new();
            if let Some(props) = schema["properties"].as_object() {
                for (name, prop) in props {
                    out.insert(name.clone(), sample_for(prop));
                }
            }
            Value::Object(out)
        }
        Some("array") => json!([sample_for(&schema["items"])]),
        Some("integer") => schema["minimum"].clone(),
        Some("number") => schema["maximum"].clone(),
        Some("string") => json!("sample text"),
        _ => Value::Null,
    }
}

pub fn stage_of(req: &ChatRequest) -> StageId {
    let name = req
        .response_schema
        .as_ref()
        .map(|s| s.name.clone())
        .unwrap_or_default();
    StageId::parse(name.trim_end_matches("_report")).expect("request carries a stage schema")
}

/// Payload for the request's own schema, premium fields filled in.
pub fn full_payload(req: &ChatRequest) -> Value {
    let schema = &req
        .response_schema
        .as_ref()
        .expect("structured request")
        .schema;
    sample_for(schema)
}

pub type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, ProviderError> + Send + Sync>;

/// In-process generation service that records every call and tracks how many
/// are in flight at once.
pub struct FakeGateway {
    responder: Responder,
    delay: Duration,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<ChatRequest>>,
}

impl FakeGateway {
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            delay: Duration::from_millis(0),
            attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with a flat, fully populated payload.
    pub fn well_behaved() -> Self {
        Self::new(Box::new(|req| Ok(full_payload(req).to_string())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn stages_called(&self) -> Vec<StageId> {
        self.calls().iter().map(stage_of).collect()
    }
}

#[async_trait]
impl ChatGateway for FakeGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.responder)(&req);
        self.calls.lock().unwrap().push(req);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        result.map(|content| ChatResponse {
            content,
            input_tokens: 100,
            output_tokens: 50,
            cost_nanodollars: 1_000,
            cache_read_tokens: None,
            latency: Duration::from_millis(1),
            finish_reason: FinishReason::Stop,
        })
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageObserver for RecordingObserver {
    async fn on_stage(&self, event: &ProgressEvent) -> Result<(), ObserverError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
