// Prompt text owned by the extraction pipeline.

use crate::llm_client::prompts::{FACTUAL_ONLY_INSTRUCTION, LOG_FORMAT_INSTRUCTION};

/// Describes the fields to pull out of a "Who is hiring?" thread excerpt.
pub const WHO_IS_HIRING_SYSTEM: &str = "\
    You read excerpts of a monthly \"Who is hiring?\" forum thread. \
    Each excerpt holds one or more job postings written free-form by employers. \
    For every posting, report: \
    Company, Role, Location (including remote or onsite), Compensation, \
    Technologies, Seniority, and Contact. \
    Contact addresses are often obfuscated, e.g. `jane {at} acme {dot} io` or \
    `jane [at] acme.io`; rewrite them as plain addresses such as jane@acme.io. \
    Keep links exactly as written.";

/// The full system prompt sent with every unit.
pub fn default_system_prompt() -> String {
    format!("{WHO_IS_HIRING_SYSTEM}\n\n{FACTUAL_ONLY_INSTRUCTION}\n\n{LOG_FORMAT_INSTRUCTION}")
}
