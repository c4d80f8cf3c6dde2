//! The job-posting extraction pipeline.
//!
//! raw HTML → normalizer → segmenter → balancer → filter → scheduler → compiler
//!
//! Pages are processed one after another. Units are indexed per page, and each
//! page's outcomes are appended to the compiler as a batch, so the artifact
//! follows page order and then posting order.

pub mod balancer;
pub mod compiler;
pub mod filter;
pub mod handlers;
pub mod models;
pub mod normalizer;
pub mod prompts;
pub mod scheduler;
pub mod segmenter;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::fetch::{FetchError, PageFetcher};
use crate::llm_client::Extractor;
use crate::storage::{ArtifactHandle, ArtifactStore, StorageError, COMPILED_ARTIFACT};

use self::compiler::{CompiledArtifact, Compiler};
use self::filter::{FilterResult, KeywordFilter};
use self::models::{FailedUnit, OutcomeError, RunReport, Unit};
use self::scheduler::Scheduler;
use self::segmenter::SegmentKind;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("page {page}, unit {index} failed: {error}")]
    UnitFailed {
        page: usize,
        index: usize,
        error: OutcomeError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub artifact: CompiledArtifact,
    pub handle: ArtifactHandle,
    pub report: RunReport,
}

pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn ArtifactStore>,
    filter: KeywordFilter,
    config: PipelineConfig,
    /// Runs share one artifact location, so only one may be between its
    /// delete and its write at a time.
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn ArtifactStore>,
        config: PipelineConfig,
    ) -> Self {
        let filter = KeywordFilter::new(&config.interest_keywords);
        Self {
            fetcher,
            extractor,
            store,
            filter,
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// Normalizes, segments and balances one page into bounded units.
    ///
    /// Fixed-size fallback slices are already at the chunk size and are not
    /// merged.
    pub fn prepare_units(&self, html: &str) -> Vec<Unit> {
        let cleaned = normalizer::normalize(html);
        debug!(
            "Normalized page from {} to {} bytes",
            html.len(),
            cleaned.len()
        );

        let segmentation = segmenter::segment(
            &cleaned,
            self.config.max_unit_size,
            self.config.chunk_size,
        );

        match segmentation.kind {
            SegmentKind::Postings { markers } => {
                debug!("Merging units cut at {markers} posting anchors");
                balancer::merge(segmentation.units, self.config.max_unit_size)
            }
            SegmentKind::FixedSize => segmentation.units,
        }
    }

    /// Runs every page through the pipeline and writes one artifact.
    ///
    /// The previous artifact is deleted before anything is fetched. Unit
    /// failures are recorded in the report unless `fail_fast` is set, in which
    /// case the run stops and nothing is written. Concurrent calls queue and
    /// run one at a time.
    pub async fn run(&self, urls: &[String]) -> Result<RunOutput, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id);
        async {
            let _running = match self.run_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    info!("Another run is in progress, waiting");
                    self.run_lock.lock().await
                }
            };
            self.run_pages(run_id, urls).await
        }
        .instrument(span)
        .await
    }

    async fn run_pages(&self, run_id: Uuid, urls: &[String]) -> Result<RunOutput, PipelineError> {
        info!("Starting run over {} pages", urls.len());
        self.store.delete_artifact().await?;

        let scheduler = Scheduler::new(
            Arc::clone(&self.extractor),
            self.config.system_prompt.as_str(),
            self.config.scheduler.clone(),
        );
        let mut compiler = Compiler::new();
        let mut report = RunReport::default();

        for (page, url) in urls.iter().enumerate() {
            let html = self
                .fetcher
                .fetch(url)
                .await
                .map_err(|source| PipelineError::Fetch {
                    url: url.clone(),
                    source,
                })?;

            let units = self.prepare_units(&html);
            report.units_segmented += units.len();

            let FilterResult { kept, rejected } = self.filter.filter(units);
            report.units_rejected += rejected;
            report.units_dispatched += kept.len();
            info!("Page {}: dispatching {} units from {}", page, kept.len(), url);

            let outcomes = scheduler
                .run(kept)
                .await
                .map_err(|failure| PipelineError::UnitFailed {
                    page,
                    index: failure.index,
                    error: failure.error,
                })?;

            for outcome in &outcomes {
                match &outcome.error {
                    Some(error) => report.failed_units.push(FailedUnit {
                        page,
                        index: outcome.index,
                        error: error.clone(),
                    }),
                    None if outcome.is_usable() => report.units_extracted += 1,
                    None => report.units_empty += 1,
                }
            }

            compiler.append(outcomes);
            report.pages += 1;
        }

        report.complete = report.failed_units.is_empty();
        if !report.complete {
            warn!(
                "{} units failed; the artifact is partial",
                report.failed_units.len()
            );
        }

        let artifact = compiler.finish();
        let handle = self
            .store
            .write_artifact(COMPILED_ARTIFACT, artifact.bytes.clone())
            .await?;

        info!(
            "Run complete: {} entries written to {}",
            artifact.entries, handle.location
        );

        Ok(RunOutput {
            run_id,
            artifact,
            handle,
            report,
        })
    }
}
