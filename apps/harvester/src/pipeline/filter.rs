//! Relevance filter: drops units that mention none of the interest keywords.

use tracing::{debug, info};

use crate::pipeline::models::Unit;

/// Technology keywords used when no list is configured.
pub const DEFAULT_INTEREST_KEYWORDS: &[&str] = &[
    "react",
    "reactjs",
    "react.js",
    "vue",
    "vuejs",
    "vue.js",
    "go",
    "golang",
    "go-lang",
    "javascript",
    "js",
    "typescript",
    "ts",
    "aws",
    "amazon web services",
    "node",
    "nodejs",
    "node.js",
    "next",
    "nextjs",
    "next.js",
    "angular",
    "angularjs",
    "svelte",
    "sveltekit",
    "express",
    "expressjs",
    "postgresql",
    "postgres",
    "mongodb",
    "mongo",
    "docker",
    "kubernetes",
    "k8s",
    "graphql",
];

/// Case-insensitive substring matcher over a fixed keyword set.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

/// Units that survived plus how many were dropped.
#[derive(Debug, Clone)]
pub struct FilterResult {
    pub kept: Vec<Unit>,
    pub rejected: usize,
}

impl KeywordFilter {
    /// Blank keywords are ignored; the rest are lower-cased once here.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Keywords found in `text`, in configured order.
    pub fn matches(&self, text: &str) -> Vec<&str> {
        let lowered = text.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| lowered.contains(k.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Keeps matching units in order with their original indices.
    pub fn filter(&self, units: Vec<Unit>) -> FilterResult {
        let total = units.len();
        let mut kept = Vec::with_capacity(total);

        for unit in units {
            let found = self.matches(&unit.text);
            if found.is_empty() {
                debug!("Unit {} rejected: no interest keywords", unit.index);
            } else {
                debug!("Unit {} accepted: {:?}", unit.index, found);
                kept.push(unit);
            }
        }

        let rejected = total - kept.len();
        info!(
            "Filtering complete: {} units accepted, {} rejected",
            kept.len(),
            rejected
        );

        FilterResult { kept, rejected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_keeps_order_and_sparse_indices() {
        let filter = KeywordFilter::new(["rust", "elixir"]);
        let units = vec![
            Unit::new(0, "Acme | Rust | Remote"),
            Unit::new(1, "Initech | COBOL"),
            Unit::new(2, "Globex | ELIXIR"),
        ];
        let result = filter.filter(units);
        let indices: Vec<usize> = result.kept.iter().map(|u| u.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(result.rejected, 1);
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let filter = KeywordFilter::new(["TypeScript"]);
        assert_eq!(filter.matches("we write typescript"), vec!["typescript"]);
    }

    #[test]
    fn test_blank_keywords_are_ignored() {
        let filter = KeywordFilter::new(["", "  ", "go"]);
        assert!(filter.matches("nothing relevant here").is_empty());
        assert_eq!(filter.matches("Golang shop"), vec!["go"]);
    }

    #[test]
    fn test_empty_keyword_set_rejects_everything() {
        let filter = KeywordFilter::new(Vec::<String>::new());
        let result = filter.filter(vec![Unit::new(0, "anything")]);
        assert!(result.kept.is_empty());
        assert_eq!(result.rejected, 1);
    }

    #[test]
    fn test_default_list_matches_react() {
        let filter = KeywordFilter::new(DEFAULT_INTEREST_KEYWORDS);
        assert!(!filter.matches("React Native role").is_empty());
    }
}
