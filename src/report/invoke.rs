//! Model invocation: one structured call to the generation service.
//!
//! Builds the request, classifies failures into [`InvocationError`], and
//! reduces the heterogeneously framed response to a single artifact object.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::gateway::{
    Attribution, ChatGateway, ChatModel, ChatRequest, ChatResponse, Message, ProviderError,
    StructuredOutput,
};
use crate::schema::SchemaContract;

use super::types::{Artifact, TokenUsage};

// =============================================================================
// Errors
// =============================================================================

/// Why a model could not serve the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableCause {
    /// The service does not accept the model identifier.
    Rejected,
    /// The call exceeded the invocation timeout.
    TimedOut,
    /// Any other provider failure.
    Provider(String),
}

impl fmt::Display for UnavailableCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableCause::Rejected => f.write_str("model rejected by provider"),
            UnavailableCause::TimedOut => f.write_str("call timed out"),
            UnavailableCause::Provider(message) => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvocationError {
    /// Rate limit or quota signal. Never retried here.
    #[error("generation quota exceeded, retry after {}s", .retry_after.as_secs())]
    QuotaExceeded { retry_after: Duration },

    #[error("generation service returned no content")]
    EmptyResponse,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("model {model} unavailable: {cause}")]
    ModelUnavailable {
        model: String,
        cause: UnavailableCause,
    },
}

impl InvocationError {
    /// Only a rejected model identifier is worth a second try elsewhere.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            InvocationError::ModelUnavailable {
                cause: UnavailableCause::Rejected,
                ..
            }
        )
    }

    fn from_provider(err: ProviderError, model: &str) -> Self {
        match err {
            ProviderError::RateLimited { retry_after, .. } => {
                InvocationError::QuotaExceeded { retry_after }
            }
            ProviderError::ModelNotFound { .. } => InvocationError::ModelUnavailable {
                model: model.to_string(),
                cause: UnavailableCause::Rejected,
            },
            ProviderError::Timeout(_, _) => InvocationError::ModelUnavailable {
                model: model.to_string(),
                cause: UnavailableCause::TimedOut,
            },
            other => InvocationError::ModelUnavailable {
                model: model.to_string(),
                cause: UnavailableCause::Provider(other.to_string()),
            },
        }
    }
}

// =============================================================================
// Response unwrapping
// =============================================================================

/// Recognised framings of a structured response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{"emotion_report": {...}}`: the first value is the payload.
    NamedWrapper(String),
    /// `{"status": "ok", "report": {...}}`: a scalar leads, the first
    /// object-valued key holds the payload.
    ScalarLedWrapper(String),
    /// The top-level object is the payload.
    Flat,
}

/// Decide how `value` frames its payload.
///
/// The primitive check on the first value is what keeps a scalar-led wrapper
/// from being read as flat.
pub fn classify_shape(value: &Value) -> Result<ResponseShape, InvocationError> {
    let map = match value {
        Value::Object(map) if !map.is_empty() => map,
        Value::Object(_) => {
            return Err(InvocationError::MalformedPayload(
                "top-level object has no keys".to_string(),
            ))
        }
        other => {
            return Err(InvocationError::MalformedPayload(format!(
                "expected a JSON object, got {}",
                json_kind(other)
            )))
        }
    };

    let Some((first_key, first_value)) = map.iter().next() else {
        return Err(InvocationError::MalformedPayload(
            "top-level object has no keys".to_string(),
        ));
    };

    match first_value {
        Value::Object(_) => Ok(ResponseShape::NamedWrapper(first_key.clone())),
        Value::Array(_) => Ok(ResponseShape::Flat),
        _ => {
            let wrapper = map
                .iter()
                .find(|(_, v)| v.is_object())
                .map(|(k, _)| k.clone());
            Ok(match wrapper {
                Some(key) => ResponseShape::ScalarLedWrapper(key),
                None => ResponseShape::Flat,
            })
        }
    }
}

/// Reduce a parsed response to the single artifact object it carries.
pub fn unwrap_payload(value: Value) -> Result<(ResponseShape, Artifact), InvocationError> {
    let shape = classify_shape(&value)?;
    let Value::Object(mut map) = value else {
        return Err(InvocationError::MalformedPayload(
            "expected a JSON object".to_string(),
        ));
    };
    let payload = match &shape {
        ResponseShape::NamedWrapper(key) | ResponseShape::ScalarLedWrapper(key) => {
            map.remove(key).unwrap_or(Value::Null)
        }
        ResponseShape::Flat => Value::Object(map),
    };
    match payload {
        Value::Object(artifact) => Ok((shape, artifact)),
        other => Err(InvocationError::MalformedPayload(format!(
            "payload is {}, not an object",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Cut the outermost JSON value out of a response, skipping code fences and
/// surrounding prose. Whichever of `{` or `[` appears first decides the value,
/// so an array is handed back whole and rejected by the caller.
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find(&['{', '['][..]) else {
        return trimmed;
    };
    let candidate = &trimmed[start..];
    let (open, close) = if candidate.starts_with('[') {
        ('[', ']')
    } else {
        ('{', '}')
    };
    match find_matching_close(candidate, open, close) {
        Some(end) => &candidate[..end],
        // Unbalanced: let the parser report it.
        None => candidate,
    }
}

/// Byte offset just past the bracket closing the one `s` starts with.
/// Brackets inside string literals are not counted.
fn find_matching_close(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(i + c.len_utf8());
            }
        }
    }
    None
}

/// Parse raw response content into a contract-shaped artifact.
pub fn parse_artifact(
    content: &str,
    schema: &SchemaContract,
) -> Result<(ResponseShape, Artifact), InvocationError> {
    if content.trim().is_empty() {
        return Err(InvocationError::EmptyResponse);
    }
    let value: Value = serde_json::from_str(extract_json(content))
        .map_err(|e| InvocationError::MalformedPayload(e.to_string()))?;
    let (shape, artifact) = unwrap_payload(value)?;
    let artifact = schema
        .conform(artifact)
        .map_err(|e| InvocationError::MalformedPayload(e.to_string()))?;
    Ok((shape, artifact))
}

// =============================================================================
// Adapter
// =============================================================================

/// Per-call options that are not part of the prompt itself.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Provider-side prompt cache hint (the instruction fingerprint).
    pub cache_hint: Option<String>,
    pub max_tokens: Option<u32>,
    pub attribution: Attribution,
}

/// A successful call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub artifact: Artifact,
    pub usage: TokenUsage,
    /// Model that actually served the call.
    pub model: String,
    pub shape: ResponseShape,
    pub latency: Duration,
}

pub struct InvocationAdapter {
    gateway: Arc<dyn ChatGateway>,
    model: ChatModel,
    fallback: Option<ChatModel>,
    temperature: f32,
    call_timeout: Duration,
}

impl InvocationAdapter {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: ChatModel::openrouter(model),
            fallback: None,
            temperature: 0.7,
            call_timeout: Duration::from_secs(180),
        }
    }

    pub fn with_fallback(mut self, model: Option<String>) -> Self {
        self.fallback = model.map(ChatModel::openrouter);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn model(&self) -> &str {
        self.model.model_id()
    }

    /// Run one structured call, falling back once to the secondary model when
    /// the primary model is rejected. Quota, timeout and payload errors are
    /// returned as-is.
    pub async fn invoke(
        &self,
        instruction: &str,
        user_prompt: &str,
        schema: &SchemaContract,
        options: InvokeOptions,
    ) -> Result<Invocation, InvocationError> {
        let mut req = ChatRequest::new(
            self.model.clone(),
            vec![Message::system(instruction), Message::user(user_prompt)],
            options.attribution,
        )
        .temperature(self.temperature)
        .structured(StructuredOutput::strict(
            schema.name.clone(),
            schema.to_json_schema(),
        ));
        if let Some(max) = options.max_tokens {
            req = req.max_tokens(max);
        }
        if let Some(hint) = options.cache_hint {
            req = req.cache_key(hint);
        }

        match self.call_once(&req, schema).await {
            Err(err) if err.is_fallback_eligible() => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        model = self.model.model_id(),
                        fallback = fallback.model_id(),
                        error = %err,
                        "primary model rejected, retrying on fallback"
                    );
                    self.call_once(&req.with_model(fallback.clone()), schema)
                        .await
                }
                None => Err(err),
            },
            other => other,
        }
    }

    async fn call_once(
        &self,
        req: &ChatRequest,
        schema: &SchemaContract,
    ) -> Result<Invocation, InvocationError> {
        let model = req.model.model_id().to_string();
        let started = Instant::now();
        let resp: ChatResponse = match timeout(self.call_timeout, self.gateway.chat(req.clone())).await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => {
                warn!(model = %model, code = err.code(), error = %err, "generation call failed");
                return Err(InvocationError::from_provider(err, &model));
            }
            Err(_) => {
                warn!(model = %model, timeout_secs = self.call_timeout.as_secs(), "generation call timed out");
                return Err(InvocationError::ModelUnavailable {
                    model,
                    cause: UnavailableCause::TimedOut,
                });
            }
        };

        let (shape, artifact) = parse_artifact(&resp.content, schema)?;
        debug!(model = %model, schema = %schema.name, shape = ?shape, "payload unwrapped");

        Ok(Invocation {
            artifact,
            usage: TokenUsage {
                input_tokens: resp.input_tokens,
                output_tokens: resp.output_tokens,
                cost_nanodollars: resp.cost_nanodollars,
            },
            model,
            shape,
            latency: started.elapsed(),
        })
    }
}
