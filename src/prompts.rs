//! Prompt templates for the report stages.
//!
//! Domain logic for rendering stage instructions and user prompts.
//! Provider-agnostic.

use crate::report::types::{Artifact, Record, StageId, Tier};

/// Rendered prompt ready for the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

/// Escape XML special characters to prevent prompt injection via tag breaking.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// =============================================================================
// Tier directives
// =============================================================================

const STANDARD_DIRECTIVE: &str = "The user is on the standard plan. Stay well inside every \
length limit and set these premium-only fields to null: {premium_fields}.";

const PREMIUM_DIRECTIVE: &str = "The user is on the premium plan. Fill every field with care, \
including the in-depth ones: {premium_fields}.";

fn tier_directive(tier: Tier, premium_fields: &[&str]) -> String {
    let template = match tier {
        Tier::Standard => STANDARD_DIRECTIVE,
        Tier::Premium => PREMIUM_DIRECTIVE,
    };
    let fields = if premium_fields.is_empty() {
        "(none)".to_string()
    } else {
        premium_fields.join(", ")
    };
    template.replace("{premium_fields}", &fields)
}

// =============================================================================
// Templates
// =============================================================================

/// A prompt template with placeholders.
///
/// `system` carries `{tier_directive}`; `user` carries `{date}`,
/// `{day_of_week}`, `{record_count}` and `{body}`.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    /// The system instruction after tier substitution.
    pub fn render_instruction(&self, tier: Tier, premium_fields: &[&str]) -> String {
        self.system
            .replace("{tier_directive}", &tier_directive(tier, premium_fields))
            .trim()
            .to_string()
    }

    pub fn render(
        &self,
        tier: Tier,
        premium_fields: &[&str],
        ctx: &PromptContext<'_>,
    ) -> PromptInstance {
        let user = self
            .user
            .replace("{date}", &ctx.date)
            .replace("{day_of_week}", &escape_xml_chars(ctx.day_of_week))
            .replace("{record_count}", &ctx.record_count.to_string())
            .replace("{body}", ctx.body.trim());

        PromptInstance {
            template_slug: self.slug.to_string(),
            system: self.render_instruction(tier, premium_fields),
            user: user.trim().to_string(),
        }
    }
}

/// Values substituted into a user template.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub date: String,
    pub day_of_week: &'a str,
    pub record_count: usize,
    /// Already rendered and escaped.
    pub body: String,
}

/// Render records in `created_at` order as `[HH:MM] content` lines.
pub fn render_records(records: &[&Record]) -> String {
    let mut sorted: Vec<&Record> = records.to_vec();
    sorted.sort_by_key(|r| r.created_at);
    let lines: Vec<String> = sorted
        .iter()
        .map(|r| {
            format!(
                "[{}] {}",
                r.created_at.format("%H:%M"),
                escape_xml_chars(r.content.trim())
            )
        })
        .collect();
    format!("<records>\n{}\n</records>", lines.join("\n"))
}

/// Render the artifacts of earlier stages for the closing stage.
///
/// Skipped stages are listed as `null` so the model knows they were absent.
pub fn render_prior_reports(prior: &[(StageId, Option<&Artifact>)]) -> String {
    let mut parts = Vec::with_capacity(prior.len());
    for (stage, artifact) in prior {
        let body = match artifact {
            Some(artifact) => serde_json::to_string(artifact).unwrap_or_else(|_| "null".into()),
            None => "null".to_string(),
        };
        parts.push(format!(
            "<{stage}_report>\n{}\n</{stage}_report>",
            escape_xml_chars(&body)
        ));
    }
    parts.join("\n\n")
}

pub const SUMMARY_PROMPT: PromptTemplate = PromptTemplate {
    slug: "summary_v1",
    system: r#"You are a reflective journaling companion. Read every record the user wrote today and summarise the day as a whole: its shape, its high and low points, and a 1-10 overall score.
{tier_directive}
Write in a warm, specific, second-person voice. Ground every statement in the user's own words; never invent events. Output only JSON matching the schema."#,
    user: r#"Date: {date} ({day_of_week})
Records written today: {record_count}

{body}

Return the summary report as JSON."#,
};

pub const DAILY_PROMPT: PromptTemplate = PromptTemplate {
    slug: "daily_v1",
    system: r#"You are a reflective journaling companion. From the user's daily-log records, retell what happened today as a short narrative, list the notable events, extract keywords, and add one encouraging comment.
{tier_directive}
Write in a warm, specific, second-person voice. Ground every statement in the user's own words; never invent events. Output only JSON matching the schema."#,
    user: r#"Date: {date} ({day_of_week})
Daily-log records: {record_count}

{body}

Return the daily report as JSON."#,
};

pub const EMOTION_PROMPT: PromptTemplate = PromptTemplate {
    slug: "emotion_v1",
    system: r#"You are an emotionally attuned journaling companion. From the user's emotion records, name the dominant emotion, describe how the day felt, and list emotion keywords. Mood valence runs from -1 (very negative) to 1 (very positive); arousal from 0 (calm) to 1 (activated). Timeline entries use HH:MM times and intensity 1-5.
{tier_directive}
Write in a warm, specific, second-person voice. Ground every statement in the user's own words; never invent events. Output only JSON matching the schema."#,
    user: r#"Date: {date} ({day_of_week})
Emotion records: {record_count}

{body}

Return the emotion report as JSON."#,
};

pub const VISION_PROMPT: PromptTemplate = PromptTemplate {
    slug: "vision_v1",
    system: r#"You are a journaling companion who takes dreams and aspirations seriously. From the user's vision and dream records, summarise what they are reaching for, extract keywords, and offer encouragement.
{tier_directive}
Write in a warm, specific, second-person voice. Ground every statement in the user's own words; never invent events. Output only JSON matching the schema."#,
    user: r#"Date: {date} ({day_of_week})
Vision and dream records: {record_count}

{body}

Return the vision report as JSON."#,
};

pub const INSIGHT_PROMPT: PromptTemplate = PromptTemplate {
    slug: "insight_v1",
    system: r#"You are a thoughtful journaling companion. From the user's insight records, distil the core realisations of the day and turn them into small, concrete next actions.
{tier_directive}
Write in a warm, specific, second-person voice. Ground every statement in the user's own words; never invent events. Output only JSON matching the schema."#,
    user: r#"Date: {date} ({day_of_week})
Insight records: {record_count}

{body}

Return the insight report as JSON."#,
};

pub const FEEDBACK_PROMPT: PromptTemplate = PromptTemplate {
    slug: "feedback_v1",
    system: r#"You are a candid but kind coach. From the user's self-feedback records, give core feedback on the day, name what went well, and name what could improve.
{tier_directive}
Write in a warm, specific, second-person voice. Ground every statement in the user's own words; never invent events. Output only JSON matching the schema."#,
    user: r#"Date: {date} ({day_of_week})
Self-feedback records: {record_count}

{body}

Return the feedback report as JSON."#,
};

pub const CLOSING_PROMPT: PromptTemplate = PromptTemplate {
    slug: "closing_v1",
    system: r#"You are a journaling companion writing the last word of the day. You receive the reports already written for today (a report is null when the user wrote nothing of that kind). Close the day with a short message, one focus for tomorrow, and the growth you noticed.
{tier_directive}
Write in a warm, specific, second-person voice. Ground every statement in the user's own words; never invent events. Output only JSON matching the schema."#,
    user: r#"Date: {date} ({day_of_week})
Records written today: {record_count}

{body}

Return the closing report as JSON."#,
};

// =============================================================================
// TESTS
// =============================================================================
