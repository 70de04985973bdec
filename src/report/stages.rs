//! Static definitions of the seven report stages.

use crate::prompts::{
    render_prior_reports, render_records, PromptContext, PromptInstance, PromptTemplate,
    CLOSING_PROMPT, DAILY_PROMPT, EMOTION_PROMPT, FEEDBACK_PROMPT, INSIGHT_PROMPT,
    SUMMARY_PROMPT, VISION_PROMPT,
};
use crate::schema::{self, SchemaSource};

use super::types::{Artifact, PipelineRun, Record, RecordType, StageId, Tier};

/// Which records a stage reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    All,
    Types(&'static [RecordType]),
}

impl RecordFilter {
    pub fn matches(&self, record_type: RecordType) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::Types(types) => types.contains(&record_type),
        }
    }
}

/// What a stage's prompt body is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageInput {
    /// The run's matching records.
    Records,
    /// The redacted artifacts of every earlier stage.
    PriorReports,
}

#[derive(Debug, Clone, Copy)]
pub struct StageDefinition {
    pub id: StageId,
    pub record_filter: RecordFilter,
    pub template: PromptTemplate,
    /// Omitted entirely when no record matches `record_filter`.
    pub skippable: bool,
    pub input: StageInput,
    /// Attribution tag for usage accounting.
    pub caller: &'static str,
}

pub const STAGES: [StageDefinition; 7] = [
    StageDefinition {
        id: StageId::Summary,
        record_filter: RecordFilter::All,
        template: SUMMARY_PROMPT,
        skippable: false,
        input: StageInput::Records,
        caller: "report::summary",
    },
    StageDefinition {
        id: StageId::Daily,
        record_filter: RecordFilter::Types(&[RecordType::Daily]),
        template: DAILY_PROMPT,
        skippable: true,
        input: StageInput::Records,
        caller: "report::daily",
    },
    StageDefinition {
        id: StageId::Emotion,
        record_filter: RecordFilter::Types(&[RecordType::Emotion]),
        template: EMOTION_PROMPT,
        skippable: true,
        input: StageInput::Records,
        caller: "report::emotion",
    },
    StageDefinition {
        id: StageId::Vision,
        record_filter: RecordFilter::Types(&[RecordType::Vision, RecordType::Dream]),
        template: VISION_PROMPT,
        skippable: true,
        input: StageInput::Records,
        caller: "report::vision",
    },
    StageDefinition {
        id: StageId::Insight,
        record_filter: RecordFilter::Types(&[RecordType::Insight]),
        template: INSIGHT_PROMPT,
        skippable: true,
        input: StageInput::Records,
        caller: "report::insight",
    },
    StageDefinition {
        id: StageId::Feedback,
        record_filter: RecordFilter::Types(&[RecordType::Feedback]),
        template: FEEDBACK_PROMPT,
        skippable: true,
        input: StageInput::Records,
        caller: "report::feedback",
    },
    StageDefinition {
        id: StageId::Closing,
        record_filter: RecordFilter::All,
        template: CLOSING_PROMPT,
        skippable: false,
        input: StageInput::PriorReports,
        caller: "report::closing",
    },
];

pub fn stage(id: StageId) -> &'static StageDefinition {
    // STAGES is declared in StageId order.
    &STAGES[id as usize]
}

impl StageDefinition {
    pub fn schema_source(&self) -> &'static SchemaSource {
        schema::schema_source(self.id)
    }

    pub fn premium_fields(&self) -> &'static [&'static str] {
        schema::premium_fields(self.id)
    }

    pub fn matching_records<'a>(&self, records: &'a [Record]) -> Vec<&'a Record> {
        records
            .iter()
            .filter(|r| self.record_filter.matches(r.record_type))
            .collect()
    }

    pub fn should_skip(&self, records: &[Record]) -> bool {
        self.skippable && !records.iter().any(|r| self.record_filter.matches(r.record_type))
    }

    /// System instruction after tier substitution.
    pub fn instruction(&self, tier: Tier) -> String {
        self.template.render_instruction(tier, self.premium_fields())
    }

    /// Render the full prompt for this stage of `run`.
    ///
    /// `prior` is only read by stages whose input is [`StageInput::PriorReports`].
    pub fn build_prompt(
        &self,
        run: &PipelineRun,
        prior: &[(StageId, Option<&Artifact>)],
    ) -> PromptInstance {
        let matching = self.matching_records(&run.records);
        let body = match self.input {
            StageInput::Records => render_records(&matching),
            StageInput::PriorReports => render_prior_reports(prior),
        };
        let ctx = PromptContext {
            date: run.date.format("%Y-%m-%d").to_string(),
            day_of_week: &run.day_of_week,
            record_count: matching.len(),
            body,
        };
        self.template.render(run.tier, self.premium_fields(), &ctx)
    }
}
