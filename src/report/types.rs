//! Domain types for the feedback report pipeline.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Structured value produced by a single stage.
///
/// Key order is the order the provider emitted (or the schema declares, after
/// conforming), which keeps cached artifacts byte-stable.
pub type Artifact = Map<String, Value>;

// =============================================================================
// Tier
// =============================================================================

/// Subscription level. Supplied by the caller; never computed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Standard,
    Premium,
}

impl Tier {
    pub fn from_premium(is_premium: bool) -> Self {
        if is_premium {
            Tier::Premium
        } else {
            Tier::Standard
        }
    }

    pub fn is_premium(self) -> bool {
        matches!(self, Tier::Premium)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::Premium => "premium",
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Kind of journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Daily,
    Emotion,
    Vision,
    Dream,
    Insight,
    Feedback,
    /// Any type this pipeline has no dedicated stage for.
    #[serde(other)]
    Other,
}

/// One user journal entry. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub content: String,
    pub created_at: DateTime<FixedOffset>,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        record_type: RecordType,
        content: impl Into<String>,
        created_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            id: id.into(),
            record_type,
            content: content.into(),
            created_at,
        }
    }
}

/// Keep the records written on `date`, judged in each record's own offset.
pub fn records_for_date(records: &[Record], date: NaiveDate) -> Vec<Record> {
    records
        .iter()
        .filter(|r| r.created_at.date_naive() == date)
        .cloned()
        .collect()
}

/// English weekday name for a date.
pub fn day_of_week(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

// =============================================================================
// Stages
// =============================================================================

/// The seven report stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageId {
    Summary,
    Daily,
    Emotion,
    Vision,
    Insight,
    Feedback,
    Closing,
}

impl StageId {
    pub const ALL: [StageId; 7] = [
        StageId::Summary,
        StageId::Daily,
        StageId::Emotion,
        StageId::Vision,
        StageId::Insight,
        StageId::Feedback,
        StageId::Closing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Summary => "summary",
            StageId::Daily => "daily",
            StageId::Emotion => "emotion",
            StageId::Vision => "vision",
            StageId::Insight => "insight",
            StageId::Feedback => "feedback",
            StageId::Closing => "closing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.as_str() == s)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stage within a run.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Generated(Artifact),
    Skipped,
}

impl StageOutput {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            StageOutput::Generated(artifact) => Some(artifact),
            StageOutput::Skipped => None,
        }
    }
}

// =============================================================================
// Pipeline run
// =============================================================================

/// One invocation of the pipeline. Lives only for the duration of the call.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,
    pub records: Vec<Record>,
    pub date: NaiveDate,
    pub day_of_week: String,
    pub tier: Tier,
    /// Opaque; used only for usage accounting.
    pub user_id: Option<String>,
    /// Filled in stage order as the run progresses.
    pub stage_outputs: Vec<(StageId, StageOutput)>,
    pub completed_count: usize,
}

impl PipelineRun {
    pub fn new(records: Vec<Record>, date: NaiveDate, tier: Tier) -> Self {
        Self {
            id: Uuid::new_v4(),
            records,
            date,
            day_of_week: day_of_week(date).to_string(),
            tier,
            user_id: None,
            stage_outputs: Vec::with_capacity(StageId::ALL.len()),
            completed_count: 0,
        }
    }

    /// Run over the subset of `records` written on `date`.
    pub fn for_date(records: &[Record], date: NaiveDate, tier: Tier) -> Self {
        Self::new(records_for_date(records, date), date, tier)
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_day_of_week(mut self, day_of_week: impl Into<String>) -> Self {
        self.day_of_week = day_of_week.into();
        self
    }

    pub fn output(&self, stage: StageId) -> Option<&StageOutput> {
        self.stage_outputs
            .iter()
            .find(|(id, _)| *id == stage)
            .map(|(_, output)| output)
    }

    pub(crate) fn record_output(&mut self, stage: StageId, output: StageOutput) {
        self.stage_outputs.push((stage, output));
        self.completed_count += 1;
    }
}

// =============================================================================
// Composite report
// =============================================================================

/// All seven stage artifacts; skipped stages are `null`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedbackReport {
    pub date: NaiveDate,
    pub day_of_week: String,
    pub tier: Tier,
    pub summary_report: Option<Artifact>,
    pub daily_report: Option<Artifact>,
    pub emotion_report: Option<Artifact>,
    pub vision_report: Option<Artifact>,
    pub insight_report: Option<Artifact>,
    pub feedback_report: Option<Artifact>,
    pub closing_report: Option<Artifact>,
}

impl FeedbackReport {
    pub(crate) fn from_run(run: &PipelineRun) -> Self {
        let take = |stage: StageId| run.output(stage).and_then(StageOutput::artifact).cloned();
        Self {
            date: run.date,
            day_of_week: run.day_of_week.clone(),
            tier: run.tier,
            summary_report: take(StageId::Summary),
            daily_report: take(StageId::Daily),
            emotion_report: take(StageId::Emotion),
            vision_report: take(StageId::Vision),
            insight_report: take(StageId::Insight),
            feedback_report: take(StageId::Feedback),
            closing_report: take(StageId::Closing),
        }
    }

    pub fn stage(&self, stage: StageId) -> Option<&Artifact> {
        match stage {
            StageId::Summary => self.summary_report.as_ref(),
            StageId::Daily => self.daily_report.as_ref(),
            StageId::Emotion => self.emotion_report.as_ref(),
            StageId::Vision => self.vision_report.as_ref(),
            StageId::Insight => self.insight_report.as_ref(),
            StageId::Feedback => self.feedback_report.as_ref(),
            StageId::Closing => self.closing_report.as_ref(),
        }
    }
}

// =============================================================================
// Progress
// =============================================================================

/// How a stage's output was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Generated,
    Cached,
    Skipped,
}

/// Usage info for a single stage's provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
}

/// Emitted once per stage when it completes (including skipped stages).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProgressEvent {
    /// 1-based count of completed stages.
    pub stage_index: usize,
    pub total_stages: usize,
    pub stage_name: StageId,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}
