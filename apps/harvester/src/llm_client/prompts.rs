// Shared prompt fragments. Each service that owns a prompt keeps it in a
// prompts.rs alongside it and appends these where relevant.

/// Appended to every extraction system prompt.
pub const FACTUAL_ONLY_INSTRUCTION: &str = "\
    CRITICAL: Only report what the posting text states. \
    Never invent, infer or embellish company names, roles, pay or contact details. \
    If a field is not present in the text, leave it out.";

/// Keeps output in the flat log format the compiled artifact expects.
pub const LOG_FORMAT_INSTRUCTION: &str = "\
    Respond with one block per posting, one `Field: value` pair per line, \
    and a blank line between postings. Do not use markdown. \
    If the text contains no job postings, respond with nothing at all.";
