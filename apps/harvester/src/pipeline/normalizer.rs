//! Markup normalizer. Strips navigation chrome, reply threads and styling
//! noise from a raw thread page, leaving one whitespace-collapsed string.
//!
//! Two passes:
//! 1. DOM pass (`scraper`): detach reply rows and noise elements.
//! 2. Text pass: the ordered `NOISE_TABLE` of `(match, replacement)` rules.
//!
//! Posting anchors (`<a ... id="up_N">`) and ordinary links survive both passes
//! so the segmenter can still find posting boundaries.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Elements removed together with everything inside them.
const NOISE_ELEMENTS: &str = "span, br, img, form, u, font, script, style";

/// Link text that identifies a nested reply row.
const REPLY_MARKER: &str = "parent";

#[derive(Debug, Clone, Copy)]
enum Match {
    Literal(&'static str),
    Pattern(&'static str),
}

/// Ordered text rules applied after the DOM pass: `(label, match, replacement)`.
const NOISE_TABLE: &[(&str, Match, &str)] = &[
    ("comments", Match::Pattern(r"(?s)<!--.*?-->"), ""),
    ("title", Match::Pattern(r"(?is)<title\b[^>]*>.*?</title>"), ""),
    ("head-tags", Match::Pattern(r"(?i)<(?:meta|link)\b[^>]*>"), ""),
    (
        "presentational-attrs",
        Match::Pattern(
            r#"(?i)\s(?:class|style|border|cellpadding|cellspacing|width|height|bgcolor|align|valign|indent|colspan|rel|title|nonce|onclick)=(?:"[^"]*"|'[^']*'|[^\s>]+)"#,
        ),
        "",
    ),
    (
        "layout-tags",
        Match::Pattern(
            r"(?i)</?(?:html|head|body|center|table|tbody|thead|tr|td|th|div|p|i|pre|code)\b[^>]*>",
        ),
        " ",
    ),
    (
        "nav-links",
        Match::Pattern(
            r"(?i)<a\b[^>]*>\s*(?:hide|past|favorite|flag|unflag|next|prev|root|context|reply|parent|help)\s*</a>",
        ),
        "",
    ),
    (
        "vote-metadata",
        Match::Pattern(r"\d+ points? by \S+ \d+ (?:minutes?|hours?|days?|months?|years?) ago"),
        "",
    ),
    ("comment-count", Match::Pattern(r"\d+(?:&nbsp;|\s)comments?\b"), ""),
    ("nbsp", Match::Literal("&nbsp;"), " "),
    ("amp", Match::Literal("&amp;"), "&"),
    ("whitespace", Match::Pattern(r"\s+"), " "),
];

enum Matcher {
    Literal(&'static str),
    Pattern(Regex),
}

struct NoiseRule {
    label: &'static str,
    matcher: Matcher,
    replacement: &'static str,
}

impl NoiseRule {
    fn compile(label: &'static str, kind: Match, replacement: &'static str) -> Self {
        let matcher = match kind {
            Match::Literal(needle) => Matcher::Literal(needle),
            Match::Pattern(pattern) => Matcher::Pattern(
                Regex::new(pattern).unwrap_or_else(|e| panic!("noise rule '{label}': {e}")),
            ),
        };
        Self {
            label,
            matcher,
            replacement,
        }
    }

    fn apply(&self, text: &str) -> String {
        match &self.matcher {
            Matcher::Literal(needle) => text.replace(needle, self.replacement),
            Matcher::Pattern(re) => re.replace_all(text, self.replacement).into_owned(),
        }
    }
}

static NOISE_RULES: LazyLock<Vec<NoiseRule>> = LazyLock::new(|| {
    NOISE_TABLE
        .iter()
        .map(|&(label, kind, replacement)| NoiseRule::compile(label, kind, replacement))
        .collect()
});

static ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").unwrap_or_else(|e| panic!("row selector: {e}")));

static LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").unwrap_or_else(|e| panic!("link selector: {e}")));

static NOISE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(NOISE_ELEMENTS).unwrap_or_else(|e| panic!("noise selector: {e}"))
});

/// Normalizes one raw page. Best-effort: markup the parser cannot make sense
/// of is carried through and only touched by the text rules.
pub fn normalize(html: &str) -> String {
    let mut text = strip_noise_nodes(html);
    for rule in NOISE_RULES.iter() {
        text = rule.apply(&text);
    }
    text.trim().to_string()
}

fn strip_noise_nodes(html: &str) -> String {
    let mut document = Html::parse_document(html);

    let mut doomed: Vec<_> = document
        .select(&ROW)
        .filter(|row| is_reply_row(*row))
        .map(|row| row.id())
        .collect();
    doomed.extend(document.select(&NOISE).map(|el| el.id()));

    for id in doomed {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    document.root_element().html()
}

/// Cells a row owns directly. Cells wrapping nested rows belong to those rows.
fn direct_cells<'a>(row: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| !matches!(cell.value().name(), "tr" | "table"))
        .filter(|cell| cell.select(&ROW).next().is_none())
}

/// A reply row carries a "parent" link among its own cells.
fn is_reply_row(row: ElementRef<'_>) -> bool {
    direct_cells(row).any(|cell| {
        cell.select(&LINK).any(|link| {
            link.text()
                .collect::<String>()
                .trim()
                .eq_ignore_ascii_case(REPLY_MARKER)
        })
    })
}
