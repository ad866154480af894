//! Machine-Translation Fallback
//!
//! Fills (name, locale) pairs left unresolved by the glossary and the
//! knowledge base, translating from a label the name already has.
//!
//! # Source selection
//! 1. The reference locale, if resolved
//! 2. Otherwise the first resolved locale in the configured priority order
//! 3. Otherwise (when enabled) a pre-existing corpus label, same order
//!
//! No source means no request: the locale stays missing.
//!
//! # Caching
//! Every translation is looked up in the [`TranslationCache`] first and
//! written through on success. Identical `(text, source, target)` requests
//! within a run are issued once.

use crate::error::TranslationError;
use crate::services::translation_cache::{TranslationCache, TranslationKey};
use crate::types::{LabelMap, ScientificName, TranslationProvider};
use crate::utils::retry_with_backoff;
use futures::stream::{self, StreamExt};
use pcal_common::config::RetryPolicy;
use pcal_common::LocaleCode;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A translated label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    /// Served from the cache without calling the provider
    pub from_cache: bool,
}

/// Outcome of one unique translation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Translated(Translation),
    Failed(TranslationError),
}

/// Labels one name still needs
#[derive(Debug, Clone)]
pub struct MissingLabels {
    pub name: ScientificName,
    /// Labels resolved by earlier stages
    pub resolved: BTreeMap<LocaleCode, String>,
    /// Pre-existing corpus labels usable as source text (empty when disabled)
    pub existing: BTreeMap<LocaleCode, String>,
    /// Locales to fill
    pub missing: Vec<LocaleCode>,
}

/// A translation that failed after retries
#[derive(Debug, Clone)]
pub struct FailedTranslation {
    pub key: TranslationKey,
    /// Names that needed this translation
    pub names: Vec<ScientificName>,
    pub reason: TranslationError,
}

/// Result of [`MachineTranslationFallback::fill_missing`]
#[derive(Debug, Clone, Default)]
pub struct FallbackReport {
    pub labels: LabelMap,
    /// Unique translation requests
    pub requested: usize,
    /// Requests served by the cache
    pub from_cache: usize,
    pub failed: Vec<FailedTranslation>,
    /// Requests abandoned on cancellation
    pub cancelled: usize,
    /// Missing pairs with no source label to translate from
    pub without_source: usize,
}

/// Translation stage over a [`TranslationProvider`]
pub struct MachineTranslationFallback {
    provider: Arc<dyn TranslationProvider>,
    cache: TranslationCache,
    retry: RetryPolicy,
    max_in_flight: usize,
    reference_locale: LocaleCode,
    /// Total order over the configured locales
    priority: Vec<LocaleCode>,
}

impl MachineTranslationFallback {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        cache: TranslationCache,
        retry: RetryPolicy,
        max_in_flight: usize,
        reference_locale: LocaleCode,
        priority: Vec<LocaleCode>,
    ) -> Self {
        Self {
            provider,
            cache,
            retry,
            max_in_flight: max_in_flight.max(1),
            reference_locale,
            priority,
        }
    }

    /// Pick the `(locale, text)` to translate from
    pub fn select_source(
        &self,
        resolved: &BTreeMap<LocaleCode, String>,
        existing: &BTreeMap<LocaleCode, String>,
    ) -> Option<(LocaleCode, String)> {
        let usable = |labels: &BTreeMap<LocaleCode, String>, locale: &LocaleCode| {
            labels
                .get(locale)
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(|t| (locale.clone(), t.to_string()))
        };

        usable(resolved, &self.reference_locale)
            .or_else(|| self.priority.iter().find_map(|l| usable(resolved, l)))
            .or_else(|| self.priority.iter().find_map(|l| usable(existing, l)))
    }

    /// Translate one text, cache first
    ///
    /// # Errors
    /// The provider's last error once the retry policy is exhausted, or
    /// [`TranslationError::Cancelled`]
    pub async fn translate(
        &self,
        text: &str,
        source: &LocaleCode,
        target: &LocaleCode,
        cancel: &CancellationToken,
    ) -> Result<Translation, TranslationError> {
        let key = TranslationKey::new(text, source.clone(), target.clone());

        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                debug!(source = %source, target = %target, "Translation served from cache");
                return Ok(Translation {
                    text: cached,
                    from_cache: true,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Translation cache read failed; translating uncached"),
        }

        let operation = format!("translation {}→{}", source, target);
        let translated = retry_with_backoff(
            &operation,
            &self.retry,
            cancel,
            TranslationError::Cancelled,
            TranslationError::is_retryable,
            || self.provider.translate(text, source, target),
        )
        .await
        .map_err(|failure| {
            if failure.cancelled {
                TranslationError::Cancelled
            } else {
                failure.error
            }
        })?;

        let translated = translated.trim().to_string();
        if translated.is_empty() {
            return Err(TranslationError::Empty);
        }

        if let Err(e) = self.cache.put(&key, &translated).await {
            warn!(error = %e, "Translation cache write failed");
        }

        Ok(Translation {
            text: translated,
            from_cache: false,
        })
    }

    /// Translate every missing pair that has a usable source label
    pub async fn fill_missing(
        &self,
        pending: &[MissingLabels],
        cancel: &CancellationToken,
    ) -> FallbackReport {
        let mut report = FallbackReport::default();

        // Unique request → names that need it
        let mut requests: BTreeMap<TranslationKey, Vec<ScientificName>> = BTreeMap::new();
        for entry in pending {
            if entry.missing.is_empty() {
                continue;
            }
            let Some((source_locale, source_text)) =
                self.select_source(&entry.resolved, &entry.existing)
            else {
                report.without_source += entry.missing.len();
                continue;
            };

            for target in &entry.missing {
                if *target == source_locale {
                    report.without_source += 1;
                    continue;
                }
                let key = TranslationKey::new(
                    source_text.clone(),
                    source_locale.clone(),
                    target.clone(),
                );
                requests.entry(key).or_default().push(entry.name.clone());
            }
        }

        report.requested = requests.len();
        if requests.is_empty() {
            return report;
        }

        info!(
            provider = self.provider.name(),
            requests = report.requested,
            max_in_flight = self.max_in_flight,
            "Translating unresolved labels"
        );

        let outcomes: Vec<(TranslationKey, Vec<ScientificName>, TranslationOutcome)> =
            stream::iter(requests)
                .map(|(key, names)| {
                    let cancel = cancel.clone();
                    async move {
                        let outcome = tokio::select! {
                            _ = cancel.cancelled() => TranslationOutcome::Failed(TranslationError::Cancelled),
                            result = self.translate(
                                &key.source_text,
                                &key.source_locale,
                                &key.target_locale,
                                &cancel,
                            ) => match result {
                                Ok(translation) => TranslationOutcome::Translated(translation),
                                Err(e) => TranslationOutcome::Failed(e),
                            },
                        };
                        (key, names, outcome)
                    }
                })
                .buffer_unordered(self.max_in_flight)
                .collect()
                .await;

        for (key, names, outcome) in outcomes {
            match outcome {
                TranslationOutcome::Translated(translation) => {
                    if translation.from_cache {
                        report.from_cache += 1;
                    }
                    for name in names {
                        report
                            .labels
                            .insert((name, key.target_locale.clone()), translation.text.clone());
                    }
                }
                TranslationOutcome::Failed(TranslationError::Cancelled) => {
                    report.cancelled += 1;
                }
                TranslationOutcome::Failed(reason) => {
                    warn!(
                        source = %key.source_locale,
                        target = %key.target_locale,
                        error = %reason,
                        names = %names.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(","),
                        "Translation failed; labels left unresolved"
                    );
                    report.failed.push(FailedTranslation { key, names, reason });
                }
            }
        }

        report.failed.sort_by(|a, b| a.key.cmp(&b.key));

        info!(
            requested = report.requested,
            from_cache = report.from_cache,
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "Translation fallback complete"
        );

        report
    }
}
