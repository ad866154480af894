//! Knowledge-Base Resolver
//!
//! Splits a (names × locales) request into bounded batches, runs them
//! concurrently against a [`KnowledgeBase`], retries each failed batch with
//! exponential backoff, and isolates failures: a batch that exhausts its
//! retries contributes no labels, every other batch is unaffected.
//!
//! # Batching
//! - Names are sorted and chunked by `batch_size`
//! - Locales are sorted and chunked by `locales_per_query` (one group by default)
//! - One query per (name chunk, locale group)
//!
//! # Concurrency
//! At most `max_in_flight` batches run at once (`buffer_unordered`); the rest
//! wait locally. Results are reassembled by batch index, so the output never
//! depends on completion order.

use crate::error::ResolutionError;
use crate::types::{KnowledgeBase, LabelMap, ScientificName};
use crate::utils::retry_with_backoff;
use futures::stream::{self, StreamExt};
use pcal_common::config::{KnowledgeBaseConfig, RetryPolicy};
use pcal_common::LocaleCode;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Labels for the batch's names/locales (possibly partial)
    Success(LabelMap),
    /// Every pair in the batch is absent for this run
    Failure {
        reason: ResolutionError,
        attempts: u32,
    },
}

/// One batch with its outcome
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub index: usize,
    pub names: Vec<ScientificName>,
    pub locales: Vec<LocaleCode>,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Failure { .. })
    }
}

/// Result of [`KnowledgeBaseResolver::resolve_batch`]
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Union of all successful batches
    pub labels: LabelMap,
    /// Per-batch reports, ordered by batch index
    pub batches: Vec<BatchReport>,
}

impl Resolution {
    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchReport> {
        self.batches.iter().filter(|b| b.is_failure())
    }
}

/// Batching, retrying front end over a [`KnowledgeBase`]
pub struct KnowledgeBaseResolver {
    knowledge_base: Arc<dyn KnowledgeBase>,
    batch_size: usize,
    locales_per_query: Option<usize>,
    retry: RetryPolicy,
    max_in_flight: usize,
}

impl KnowledgeBaseResolver {
    pub fn new(
        knowledge_base: Arc<dyn KnowledgeBase>,
        config: &KnowledgeBaseConfig,
        max_in_flight: usize,
    ) -> Self {
        Self::with_settings(
            knowledge_base,
            config.batch_size,
            config.locales_per_query,
            config.retry.clone(),
            max_in_flight,
        )
    }

    pub fn with_settings(
        knowledge_base: Arc<dyn KnowledgeBase>,
        batch_size: usize,
        locales_per_query: Option<usize>,
        retry: RetryPolicy,
        max_in_flight: usize,
    ) -> Self {
        Self {
            knowledge_base,
            batch_size: batch_size.max(1),
            locales_per_query: locales_per_query.map(|n| n.max(1)),
            retry,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Split the request into batches, in index order
    fn plan_batches(
        &self,
        names: &BTreeSet<ScientificName>,
        locales: &BTreeSet<LocaleCode>,
    ) -> Vec<(Vec<ScientificName>, Vec<LocaleCode>)> {
        let names: Vec<ScientificName> = names.iter().cloned().collect();
        let locales: Vec<LocaleCode> = locales.iter().cloned().collect();
        let group_size = self.locales_per_query.unwrap_or(locales.len()).max(1);

        let mut batches = Vec::new();
        for name_chunk in names.chunks(self.batch_size) {
            for locale_chunk in locales.chunks(group_size) {
                batches.push((name_chunk.to_vec(), locale_chunk.to_vec()));
            }
        }
        batches
    }

    /// Resolve labels for every (name, locale) pair
    ///
    /// Never fails as a whole: failed or abandoned batches are reported in
    /// [`Resolution::batches`] and leave their pairs absent.
    pub async fn resolve_batch(
        &self,
        names: &BTreeSet<ScientificName>,
        locales: &BTreeSet<LocaleCode>,
        cancel: &CancellationToken,
    ) -> Resolution {
        if names.is_empty() || locales.is_empty() {
            return Resolution::default();
        }

        let planned = self.plan_batches(names, locales);
        let total = planned.len();

        info!(
            source = self.knowledge_base.name(),
            names = names.len(),
            locales = locales.len(),
            batches = total,
            max_in_flight = self.max_in_flight,
            "Resolving labels from knowledge base"
        );

        let mut reports: Vec<BatchReport> = stream::iter(planned.into_iter().enumerate())
            .map(|(index, (batch_names, batch_locales))| {
                let cancel = cancel.clone();
                async move {
                    let outcome = self
                        .run_batch(index, &batch_names, &batch_locales, &cancel)
                        .await;
                    BatchReport {
                        index,
                        names: batch_names,
                        locales: batch_locales,
                        outcome,
                    }
                }
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        reports.sort_by_key(|r| r.index);

        let mut labels = LabelMap::new();
        let mut failed = 0usize;
        for report in &reports {
            match &report.outcome {
                BatchOutcome::Success(batch_labels) => {
                    labels.extend(batch_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                BatchOutcome::Failure { reason, attempts } => {
                    failed += 1;
                    if *reason == ResolutionError::Cancelled {
                        debug!(batch = report.index, "Knowledge-base batch abandoned (cancelled)");
                    } else {
                        warn!(
                            batch = report.index,
                            attempts,
                            error = %reason,
                            locales = %join(&report.locales),
                            names = %join(&report.names),
                            "Knowledge-base batch exhausted retries; labels left unresolved"
                        );
                    }
                }
            }
        }

        info!(
            batches = total,
            failed,
            labels = labels.len(),
            "Knowledge-base resolution complete"
        );

        Resolution {
            labels,
            batches: reports,
        }
    }

    async fn run_batch(
        &self,
        index: usize,
        names: &[ScientificName],
        locales: &[LocaleCode],
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let operation = format!("knowledge-base batch {}", index);
        let attempt = retry_with_backoff(
            &operation,
            &self.retry,
            cancel,
            ResolutionError::Cancelled,
            ResolutionError::is_retryable,
            || self.knowledge_base.query_labels(names, locales),
        );

        // In-flight requests are abandoned on cancellation
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return BatchOutcome::Failure {
                    reason: ResolutionError::Cancelled,
                    attempts: 0,
                };
            }
            result = attempt => result,
        };

        match result {
            Ok(raw) => BatchOutcome::Success(restrict(raw, names, locales)),
            Err(failure) => BatchOutcome::Failure {
                reason: if failure.cancelled {
                    ResolutionError::Cancelled
                } else {
                    failure.error
                },
                attempts: failure.attempts,
            },
        }
    }
}

/// Keep only requested, non-blank labels
fn restrict(raw: LabelMap, names: &[ScientificName], locales: &[LocaleCode]) -> LabelMap {
    raw.into_iter()
        .filter(|((name, locale), _)| names.contains(name) && locales.contains(locale))
        .filter_map(|(key, text)| {
            let text = text.trim();
            (!text.is_empty()).then(|| (key, text.to_string()))
        })
        .collect()
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
