//! Result compiler. Turns extraction outcomes into the single run artifact.

use bytes::{Bytes, BytesMut};
use tracing::{debug, info};

use crate::pipeline::models::ExtractionOutcome;

/// Terminates every compiled entry.
pub const RECORD_SEPARATOR: &str = "\n";

/// The finished artifact, ready for one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub bytes: Bytes,
    pub entries: usize,
}

/// Accumulates outcomes batch by batch (one batch per page).
///
/// Each batch is ordered by unit index before it is appended, so the artifact
/// never depends on the order in which workers finished.
#[derive(Debug, Default)]
pub struct Compiler {
    buffer: BytesMut,
    entries: usize,
    skipped: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, mut outcomes: Vec<ExtractionOutcome>) {
        outcomes.sort_by_key(|o| o.index);

        for outcome in outcomes {
            if let Some(error) = &outcome.error {
                debug!("Skipping unit {}: {}", outcome.index, error);
                self.skipped += 1;
                continue;
            }
            if !outcome.is_usable() {
                debug!("Skipping unit {}: empty extraction", outcome.index);
                self.skipped += 1;
                continue;
            }
            self.buffer.extend_from_slice(outcome.content.as_bytes());
            self.buffer.extend_from_slice(RECORD_SEPARATOR.as_bytes());
            self.entries += 1;
        }
    }

    pub fn finish(self) -> CompiledArtifact {
        info!(
            "Compiled {} entries ({} bytes), skipped {}",
            self.entries,
            self.buffer.len(),
            self.skipped
        );
        CompiledArtifact {
            bytes: self.buffer.freeze(),
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::OutcomeError;

    fn compile(outcomes: Vec<ExtractionOutcome>) -> CompiledArtifact {
        let mut compiler = Compiler::new();
        compiler.append(outcomes);
        compiler.finish()
    }

    #[test]
    fn test_compile_orders_by_index() {
        let outcomes = vec![
            ExtractionOutcome::success(7, "Globex"),
            ExtractionOutcome::success(2, "Acme"),
            ExtractionOutcome::success(4, "Initech"),
        ];
        let artifact = compile(outcomes);
        assert_eq!(artifact.bytes, Bytes::from("Acme\nInitech\nGlobex\n"));
        assert_eq!(artifact.entries, 3);
    }

    #[test]
    fn test_compile_is_independent_of_arrival_order() {
        let forward: Vec<ExtractionOutcome> = (0..6)
            .map(|i| ExtractionOutcome::success(i, format!("entry {i}")))
            .collect();
        let mut shuffled = forward.clone();
        shuffled.swap(0, 5);
        shuffled.swap(1, 3);
        shuffled.reverse();

        assert_eq!(compile(forward), compile(shuffled));
    }

    #[test]
    fn test_compile_skips_failures_and_empty_content() {
        let outcomes = vec![
            ExtractionOutcome::success(0, "Acme"),
            ExtractionOutcome::failure(1, OutcomeError::RateLimitExceeded { attempts: 5 }),
            ExtractionOutcome::success(2, "   "),
            ExtractionOutcome::success(3, ""),
            ExtractionOutcome::success(4, "Globex"),
        ];
        let artifact = compile(outcomes);
        assert_eq!(artifact.bytes, Bytes::from("Acme\nGlobex\n"));
        assert_eq!(artifact.entries, 2);
    }

    #[test]
    fn test_batches_keep_page_order() {
        let mut compiler = Compiler::new();
        compiler.append(vec![
            ExtractionOutcome::success(1, "page1-b"),
            ExtractionOutcome::success(0, "page1-a"),
        ]);
        compiler.append(vec![ExtractionOutcome::success(0, "page2-a")]);
        let artifact = compiler.finish();
        assert_eq!(artifact.entries, 3);
        assert_eq!(artifact.bytes, Bytes::from("page1-a\npage1-b\npage2-a\n"));
    }

    #[test]
    fn test_compile_nothing() {
        let artifact = compile(Vec::new());
        assert!(artifact.bytes.is_empty());
        assert_eq!(artifact.entries, 0);
    }
}
