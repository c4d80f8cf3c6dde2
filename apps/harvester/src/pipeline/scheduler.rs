//! Concurrent Extraction Scheduler.
//!
//! One worker task per unit. Each worker sleeps `index * stagger_delay`, takes
//! a slot from the admission gate (a semaphore of `max_concurrent` permits),
//! then calls the extractor, backing off on rate limits. The slot is held
//! through backoff sleeps, so no more than `max_concurrent` units are ever
//! between admission and completion.
//!
//! Outcomes are collected in completion order and re-sorted by unit index.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::llm_client::{ExtractError, Extractor};
use crate::pipeline::models::{ExtractionOutcome, OutcomeError, Unit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub stagger_delay: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Total extraction attempts allowed per unit while rate limited.
    pub max_retries: u32,
    /// Abort the batch on the first non-rate-limit failure.
    pub fail_fast: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            stagger_delay: Duration::from_millis(500),
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(60_000),
            max_retries: 5,
            fail_fast: false,
        }
    }
}

impl SchedulerConfig {
    /// Wait after the 1-based `attempt` failed: `min(base * 2^(attempt-1), max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }

    pub fn stagger_for(&self, index: usize) -> Duration {
        let slot = u32::try_from(index).unwrap_or(u32::MAX);
        self.stagger_delay.saturating_mul(slot)
    }
}

/// The failure that aborted a batch when `fail_fast` is set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unit {index} failed: {error}")]
pub struct UnitFailure {
    pub index: usize,
    pub error: OutcomeError,
}

pub struct Scheduler {
    extractor: Arc<dyn Extractor>,
    system_prompt: Arc<str>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        system_prompt: impl Into<Arc<str>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            extractor,
            system_prompt: system_prompt.into(),
            config,
        }
    }

    /// Runs every unit through the extractor and returns exactly one outcome
    /// per unit, ordered by index.
    pub async fn run(&self, units: Vec<Unit>) -> Result<Vec<ExtractionOutcome>, UnitFailure> {
        let total = units.len();
        info!(
            "Dispatching {} units with at most {} concurrent extraction calls",
            total, self.config.max_concurrent
        );

        let gate = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut pending: BTreeSet<usize> = units.iter().map(|u| u.index).collect();
        let mut workers = JoinSet::new();

        for unit in units {
            let extractor = Arc::clone(&self.extractor);
            let prompt = Arc::clone(&self.system_prompt);
            let gate = Arc::clone(&gate);
            let config = self.config.clone();
            workers.spawn(async move {
                let index = unit.index;
                // A panicking extractor becomes a service failure for its own unit.
                AssertUnwindSafe(extract_unit(extractor.as_ref(), &prompt, unit, &gate, &config))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let message = panic_message(&*panic);
                        error!("Extraction worker for unit {index} panicked: {message}");
                        ExtractionOutcome::failure(
                            index,
                            OutcomeError::Service(format!("extraction worker panicked: {message}")),
                        )
                    })
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Extraction worker was cancelled: {e}");
                    continue;
                }
            };
            pending.remove(&outcome.index);

            if self.config.fail_fast {
                if let Some(error @ OutcomeError::Service(_)) = &outcome.error {
                    warn!(
                        "Unit {} failed, aborting {} in-flight workers",
                        outcome.index,
                        workers.len()
                    );
                    workers.abort_all();
                    return Err(UnitFailure {
                        index: outcome.index,
                        error: error.clone(),
                    });
                }
            }

            outcomes.push(outcome);
        }

        // A cancelled worker never reported back; record it rather than drop the index.
        for index in pending {
            outcomes.push(ExtractionOutcome::failure(
                index,
                OutcomeError::Service("extraction worker cancelled".to_string()),
            ));
        }

        outcomes.sort_by_key(|o| o.index);
        info!("All {} units processed", outcomes.len());
        Ok(outcomes)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn extract_unit(
    extractor: &dyn Extractor,
    system_prompt: &str,
    unit: Unit,
    gate: &Semaphore,
    config: &SchedulerConfig,
) -> ExtractionOutcome {
    let stagger = config.stagger_for(unit.index);
    if !stagger.is_zero() {
        debug!("Unit {}: staggering start by {:?}", unit.index, stagger);
        tokio::time::sleep(stagger).await;
    }

    let _permit = match gate.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            return ExtractionOutcome::failure(
                unit.index,
                OutcomeError::Service("admission gate closed".to_string()),
            )
        }
    };

    let mut attempt: u32 = 1;
    loop {
        debug!(
            "Unit {}: extraction attempt {}/{}",
            unit.index, attempt, config.max_retries
        );

        match extractor.extract(system_prompt, &unit.text).await {
            Ok(content) => {
                debug!("Unit {} extracted ({} bytes)", unit.index, content.len());
                return ExtractionOutcome::success(unit.index, content);
            }
            Err(ExtractError::RateLimited { retry_after }) => {
                if attempt >= config.max_retries {
                    warn!(
                        "Unit {} still rate limited after {} attempts, giving up",
                        unit.index, attempt
                    );
                    return ExtractionOutcome::failure(
                        unit.index,
                        OutcomeError::RateLimitExceeded { attempts: attempt },
                    );
                }
                let wait = retry_after.unwrap_or_else(|| config.backoff(attempt));
                warn!(
                    "Unit {} rate limited, waiting {:?} before retry (attempt {}/{})",
                    unit.index, wait, attempt, config.max_retries
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(ExtractError::Service(message)) => {
                warn!("Unit {} failed: {}", unit.index, message);
                return ExtractionOutcome::failure(unit.index, OutcomeError::Service(message));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;

    fn config(max_concurrent: usize, stagger_ms: u64) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent,
            stagger_delay: Duration::from_millis(stagger_ms),
            ..SchedulerConfig::default()
        }
    }

    fn units(n: usize) -> Vec<Unit> {
        (0..n).map(|i| Unit::new(i, format!("posting {i}"))).collect()
    }

    /// Tracks how many calls overlap.
    #[derive(Default)]
    struct PeakExtractor {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Extractor for PeakExtractor {
        async fn extract(&self, _system: &str, text: &str) -> Result<String, ExtractError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(text.to_uppercase())
        }
    }

    /// Rate limits the first `failures` calls, then succeeds.
    struct FlakyExtractor {
        failures: u32,
        retry_after: Option<Duration>,
        calls: AtomicU32,
    }

    impl FlakyExtractor {
        fn new(failures: u32, retry_after: Option<Duration>) -> Self {
            Self {
                failures,
                retry_after,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Extractor for FlakyExtractor {
        async fn extract(&self, _system: &str, _text: &str) -> Result<String, ExtractError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(ExtractError::RateLimited {
                    retry_after: self.retry_after,
                })
            } else {
                Ok("extracted".to_string())
            }
        }
    }

    /// Fails the unit whose text is "bad"; everything else is slow.
    #[derive(Default)]
    struct OneBadExtractor {
        completed: AtomicUsize,
    }

    #[async_trait]
    impl Extractor for OneBadExtractor {
        async fn extract(&self, _system: &str, text: &str) -> Result<String, ExtractError> {
            if text == "bad" {
                return Err(ExtractError::Service("API error (status 400)".to_string()));
            }
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(text.to_string())
        }
    }

    /// Panics on the unit whose text is "boom"; everything else is slow.
    #[derive(Default)]
    struct PanickingExtractor {
        completed: AtomicUsize,
    }

    #[async_trait]
    impl Extractor for PanickingExtractor {
        async fn extract(&self, _system: &str, text: &str) -> Result<String, ExtractError> {
            if text == "boom" {
                panic!("extractor blew up");
            }
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(text.to_string())
        }
    }

    /// Longer text finishes sooner, so completion order inverts input order.
    struct ReverseExtractor;

    #[async_trait]
    impl Extractor for ReverseExtractor {
        async fn extract(&self, _system: &str, text: &str) -> Result<String, ExtractError> {
            let wait = 1_000u64.saturating_sub(text.len() as u64 * 100);
            tokio::time::sleep(Duration::from_millis(wait)).await;
            Ok(text.to_uppercase())
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.backoff(1), Duration::from_secs(1));
        assert_eq!(cfg.backoff(2), Duration::from_secs(2));
        assert_eq!(cfg.backoff(3), Duration::from_secs(4));
        assert_eq!(cfg.backoff(7), Duration::from_secs(60));
        assert_eq!(cfg.backoff(40), Duration::from_secs(60));
    }

    #[test]
    fn test_stagger_scales_with_index() {
        let cfg = config(4, 500);
        assert_eq!(cfg.stagger_for(0), Duration::ZERO);
        assert_eq!(cfg.stagger_for(3), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_concurrent() {
        let extractor = Arc::new(PeakExtractor::default());
        let scheduler = Scheduler::new(extractor.clone(), "system", config(3, 0));

        let outcomes = scheduler.run(units(10)).await.unwrap();

        assert_eq!(outcomes.len(), 10);
        assert_eq!(extractor.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staggered_starts_still_respect_gate() {
        let extractor = Arc::new(PeakExtractor::default());
        let scheduler = Scheduler::new(extractor.clone(), "system", config(2, 10));

        let outcomes = scheduler.run(units(8)).await.unwrap();

        assert_eq!(outcomes.len(), 8);
        assert!(extractor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stagger_delays_later_units() {
        let extractor = Arc::new(FlakyExtractor::new(0, None));
        let scheduler = Scheduler::new(extractor, "system", config(4, 500));

        let start = Instant::now();
        scheduler.run(vec![Unit::new(4, "late")]).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_rate_limits() {
        let extractor = Arc::new(FlakyExtractor::new(3, None));
        let scheduler = Scheduler::new(extractor.clone(), "system", config(1, 0));

        let start = Instant::now();
        let outcomes = scheduler.run(units(1)).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(outcomes[0], ExtractionOutcome::success(0, "extracted"));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of exponential backoff.
        assert!(elapsed >= Duration::from_secs(7));
        assert!(elapsed < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let extractor = Arc::new(FlakyExtractor::new(u32::MAX, None));
        let scheduler = Scheduler::new(extractor.clone(), "system", config(1, 0));

        let outcomes = scheduler.run(units(1)).await.unwrap();

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            outcomes[0].error,
            Some(OutcomeError::RateLimitExceeded { attempts: 5 })
        );
        assert!(outcomes[0].content.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_suggested_wait_overrides_backoff() {
        let extractor = Arc::new(FlakyExtractor::new(1, Some(Duration::from_secs(30))));
        let scheduler = Scheduler::new(extractor, "system", config(1, 0));

        let start = Instant::now();
        let outcomes = scheduler.run(units(1)).await.unwrap();

        assert!(outcomes[0].error.is_none());
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_error_is_terminal_for_unit_only() {
        let extractor = Arc::new(OneBadExtractor::default());
        let scheduler = Scheduler::new(extractor.clone(), "system", config(4, 0));
        let input = vec![
            Unit::new(0, "good"),
            Unit::new(1, "bad"),
            Unit::new(2, "good"),
        ];

        let outcomes = scheduler.run(input).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[1].error, Some(OutcomeError::Service(_))));
        assert_eq!(extractor.completed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_aborts_in_flight_workers() {
        let extractor = Arc::new(OneBadExtractor::default());
        let cfg = SchedulerConfig {
            fail_fast: true,
            ..config(4, 0)
        };
        let scheduler = Scheduler::new(extractor.clone(), "system", cfg);
        let input = vec![
            Unit::new(0, "good"),
            Unit::new(1, "good"),
            Unit::new(2, "bad"),
        ];

        let failure = scheduler.run(input).await.unwrap_err();

        assert_eq!(failure.index, 2);
        assert_eq!(extractor.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_worker_is_recorded_against_its_unit() {
        let extractor = Arc::new(PanickingExtractor::default());
        let scheduler = Scheduler::new(extractor.clone(), "system", config(4, 0));
        let input = vec![Unit::new(0, "good"), Unit::new(3, "boom")];

        let outcomes = scheduler.run(input).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].index, 3);
        assert!(matches!(
            &outcomes[1].error,
            Some(OutcomeError::Service(message)) if message.contains("extractor blew up")
        ));
        assert_eq!(extractor.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_aborts_on_panicking_worker() {
        let extractor = Arc::new(PanickingExtractor::default());
        let cfg = SchedulerConfig {
            fail_fast: true,
            ..config(4, 0)
        };
        let scheduler = Scheduler::new(extractor.clone(), "system", cfg);
        let input = vec![
            Unit::new(0, "good"),
            Unit::new(1, "boom"),
            Unit::new(2, "good"),
        ];

        let failure = scheduler.run(input).await.unwrap_err();

        assert_eq!(failure.index, 1);
        assert!(matches!(failure.error, OutcomeError::Service(_)));
        assert_eq!(extractor.completed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_message_reads_str_and_string_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_sorted_by_sparse_index() {
        let scheduler = Scheduler::new(Arc::new(ReverseExtractor), "system", config(4, 0));
        let input = vec![
            Unit::new(4, "a"),
            Unit::new(1, "bb"),
            Unit::new(9, "ccc"),
        ];

        let outcomes = scheduler.run(input).await.unwrap();

        let indices: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![1, 4, 9]);
        assert_eq!(outcomes[0].content, "BB");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let scheduler = Scheduler::new(Arc::new(ReverseExtractor), "system", config(4, 0));
        assert!(scheduler.run(Vec::new()).await.unwrap().is_empty());
    }
}
