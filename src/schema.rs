//! Tier-aware structured-output contracts for each report stage.
//!
//! Both tiers see the same field set; only magnitudes (text length, list size)
//! differ. Premium-exclusive fields are declared once per stage in
//! [`PREMIUM_FIELDS`] and nulled by [`redact`] for standard-tier runs, whatever
//! the provider returned.

use std::sync::OnceLock;

use serde_json::{json, Map, Value};

use crate::report::types::{Artifact, StageId, Tier};

// =============================================================================
// Contract types
// =============================================================================

/// Shape and magnitude of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text { max_chars: usize },
    Integer { min: i64, max: i64 },
    Number { min: f64, max: f64 },
    TextList { max_items: usize, max_chars: usize },
    ObjectList { max_items: usize, fields: Vec<FieldSpec> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldSpec {
    fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

fn text(name: &'static str, max_chars: usize) -> FieldSpec {
    FieldSpec::new(name, FieldKind::Text { max_chars })
}

fn integer(name: &'static str, min: i64, max: i64) -> FieldSpec {
    FieldSpec::new(name, FieldKind::Integer { min, max })
}

fn number(name: &'static str, min: f64, max: f64) -> FieldSpec {
    FieldSpec::new(name, FieldKind::Number { min, max })
}

fn list(name: &'static str, max_items: usize, max_chars: usize) -> FieldSpec {
    FieldSpec::new(
        name,
        FieldKind::TextList {
            max_items,
            max_chars,
        },
    )
}

/// The exact output contract the provider must satisfy for one stage and tier.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaContract {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

/// A stage's output violates its contract in a way conforming cannot repair.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("schema '{schema}' field '{field}': {reason}")]
pub struct SchemaViolation {
    pub schema: String,
    pub field: String,
    pub reason: String,
}

impl SchemaContract {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Every field is required (strict structured output).
    pub fn required_fields(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    pub fn nullable_fields(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.nullable)
            .map(|f| f.name)
            .collect()
    }

    pub fn field_constraints(&self) -> impl Iterator<Item = (&'static str, &FieldKind)> {
        self.fields.iter().map(|f| (f.name, &f.kind))
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Render the strict JSON-schema body sent with the request.
    pub fn to_json_schema(&self) -> Value {
        object_schema(&self.fields)
    }

    /// Reshape an unwrapped payload to exactly this contract's field list.
    ///
    /// Fields come out in declaration order. Unknown fields are dropped,
    /// absent nullable fields become `null`, and an absent or `null`
    /// non-nullable field is a violation.
    pub fn conform(&self, mut artifact: Artifact) -> Result<Artifact, SchemaViolation> {
        let mut out = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = artifact.remove(field.name).unwrap_or(Value::Null);
            if value.is_null() && !field.nullable {
                return Err(SchemaViolation {
                    schema: self.name.clone(),
                    field: field.name.to_string(),
                    reason: "required field is missing or null".to_string(),
                });
            }
            out.insert(field.name.to_string(), value);
        }
        Ok(out)
    }
}

fn object_schema(fields: &[FieldSpec]) -> Value {
    let mut properties = Map::with_capacity(fields.len());
    for field in fields {
        properties.insert(field.name.to_string(), field_schema(field));
    }
    let required: Vec<&str> = fields.iter().map(|f| f.name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn field_schema(field: &FieldSpec) -> Value {
    let (base_type, mut schema) = match &field.kind {
        FieldKind::Text { max_chars } => (
            "string",
            json!({ "description": format!("At most {max_chars} characters.") }),
        ),
        FieldKind::Integer { min, max } => (
            "integer",
            json!({ "minimum": min, "maximum": max }),
        ),
        FieldKind::Number { min, max } => (
            "number",
            json!({ "minimum": min, "maximum": max }),
        ),
        FieldKind::TextList {
            max_items,
            max_chars,
        } => (
            "array",
            json!({
                "maxItems": max_items,
                "items": {
                    "type": "string",
                    "description": format!("At most {max_chars} characters."),
                },
            }),
        ),
        FieldKind::ObjectList { max_items, fields } => (
            "array",
            json!({
                "maxItems": max_items,
                "items": object_schema(fields),
            }),
        ),
    };
    let ty = if field.nullable {
        json!([base_type, "null"])
    } else {
        json!(base_type)
    };
    if let Value::Object(map) = &mut schema {
        map.insert("type".to_string(), ty);
    }
    schema
}

// =============================================================================
// Schema sources
// =============================================================================

/// Where a stage's contract comes from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// Same contract for both tiers.
    Static(SchemaContract),
    /// Contract magnitudes depend on the tier.
    PerTier(fn(Tier) -> SchemaContract),
}

impl SchemaSource {
    pub fn resolve(&self, tier: Tier) -> SchemaContract {
        match self {
            SchemaSource::Static(contract) => contract.clone(),
            SchemaSource::PerTier(build) => build(tier),
        }
    }
}

fn by_tier<T>(tier: Tier, standard: T, premium: T) -> T {
    match tier {
        Tier::Standard => standard,
        Tier::Premium => premium,
    }
}

fn summary_contract(tier: Tier) -> SchemaContract {
    SchemaContract::new(
        "summary_report",
        vec![
            text("summary_title", by_tier(tier, 40, 60)),
            text("overall_summary", by_tier(tier, 250, 600)),
            list("key_points", by_tier(tier, 3, 5), by_tier(tier, 80, 150)),
            integer("overall_score", 1, 10),
            text("trend_analysis", 400).nullable(),
        ],
    )
}

fn daily_contract(tier: Tier) -> SchemaContract {
    SchemaContract::new(
        "daily_report",
        vec![
            text("daily_summary", by_tier(tier, 200, 500)),
            list("daily_events", by_tier(tier, 3, 6), by_tier(tier, 80, 120)),
            list("keywords", by_tier(tier, 5, 10), 20),
            text("ai_comment", by_tier(tier, 150, 300)),
            text("detailed_analysis", 600).nullable(),
        ],
    )
}

fn emotion_contract(tier: Tier) -> SchemaContract {
    SchemaContract::new(
        "emotion_report",
        vec![
            text("dominant_emotion", 20),
            text("emotion_summary", by_tier(tier, 200, 500)),
            list("emotion_keywords", by_tier(tier, 5, 8), 20),
            number("ai_mood_valence", -1.0, 1.0).nullable(),
            number("ai_mood_arousal", 0.0, 1.0).nullable(),
            FieldSpec::new(
                "emotion_timeline",
                FieldKind::ObjectList {
                    max_items: by_tier(tier, 6, 12),
                    fields: vec![
                        text("time", 5),
                        text("emotion", 20),
                        integer("intensity", 1, 5),
                    ],
                },
            )
            .nullable(),
        ],
    )
}

fn vision_contract(tier: Tier) -> SchemaContract {
    SchemaContract::new(
        "vision_report",
        vec![
            text("vision_summary", by_tier(tier, 200, 500)),
            list("vision_keywords", by_tier(tier, 5, 8), 20),
            text("encouragement", by_tier(tier, 150, 300)),
            text("vision_ai_feedback", 500).nullable(),
        ],
    )
}

fn insight_contract(tier: Tier) -> SchemaContract {
    SchemaContract::new(
        "insight_report",
        vec![
            text("insight_summary", by_tier(tier, 200, 500)),
            list("core_insights", by_tier(tier, 3, 5), 150),
            list("next_actions", by_tier(tier, 2, 4), 100),
            text("meta_analysis", 500).nullable(),
        ],
    )
}

fn feedback_contract(tier: Tier) -> SchemaContract {
    SchemaContract::new(
        "feedback_report",
        vec![
            text("core_feedback", by_tier(tier, 200, 500)),
            list("strengths", by_tier(tier, 3, 5), 120),
            list("improvements", by_tier(tier, 3, 5), 120),
            list("personalized_action_plan", 5, 150).nullable(),
        ],
    )
}

fn closing_contract() -> SchemaContract {
    SchemaContract::new(
        "closing_report",
        vec![
            text("closing_message", 300),
            text("tomorrow_focus", 150),
            list("growth_points", 3, 120),
            text("deep_reflection", 600).nullable(),
        ],
    )
}

/// The contract source for a stage.
pub fn schema_source(stage: StageId) -> &'static SchemaSource {
    static SOURCES: OnceLock<Vec<(StageId, SchemaSource)>> = OnceLock::new();
    let sources = SOURCES.get_or_init(|| {
        vec![
            (StageId::Summary, SchemaSource::PerTier(summary_contract)),
            (StageId::Daily, SchemaSource::PerTier(daily_contract)),
            (StageId::Emotion, SchemaSource::PerTier(emotion_contract)),
            (StageId::Vision, SchemaSource::PerTier(vision_contract)),
            (StageId::Insight, SchemaSource::PerTier(insight_contract)),
            (StageId::Feedback, SchemaSource::PerTier(feedback_contract)),
            (StageId::Closing, SchemaSource::Static(closing_contract())),
        ]
    });
    // Every StageId has an entry, so indexing by position is exact.
    &sources[stage as usize].1
}

/// Resolve the concrete contract for a stage and tier.
pub fn resolve(stage: StageId, tier: Tier) -> SchemaContract {
    schema_source(stage).resolve(tier)
}

// =============================================================================
// Redaction
// =============================================================================

/// Premium-exclusive fields per stage. Adding a premium field is one entry here.
pub const PREMIUM_FIELDS: [(StageId, &[&str]); 7] = [
    (StageId::Summary, &["trend_analysis"]),
    (StageId::Daily, &["detailed_analysis"]),
    (
        StageId::Emotion,
        &["ai_mood_valence", "ai_mood_arousal", "emotion_timeline"],
    ),
    (StageId::Vision, &["vision_ai_feedback"]),
    (StageId::Insight, &["meta_analysis"]),
    (StageId::Feedback, &["personalized_action_plan"]),
    (StageId::Closing, &["deep_reflection"]),
];

pub fn premium_fields(stage: StageId) -> &'static [&'static str] {
    PREMIUM_FIELDS
        .iter()
        .find(|(id, _)| *id == stage)
        .map(|(_, fields)| *fields)
        .unwrap_or(&[])
}

/// Force every premium-exclusive field to `null` for standard-tier runs.
///
/// Premium artifacts pass through untouched.
pub fn redact(mut artifact: Artifact, stage: StageId, tier: Tier) -> Artifact {
    if tier.is_premium() {
        return artifact;
    }
    for field in premium_fields(stage) {
        artifact.insert((*field).to_string(), Value::Null);
    }
    artifact
}
