//! Glossary Pipeline Orchestrator
//!
//! Runs the stages in order over one corpus:
//!
//! # Architecture
//! - **Phase 1**: Load corpus and glossary (fatal on failure)
//! - **Phase 2**: Knowledge-base resolution for pairs the glossary leaves open
//! - **Phase 3**: Machine-translation fallback for pairs still open
//! - **Phase 4**: Merge (glossary > knowledge base > machine translation)
//! - **Phase 5**: Write artifact, per-locale files and run report
//!
//! # Error Handling
//! - Corpus, glossary and artifact failures abort the run
//! - Batch and translation failures degrade to missing labels
//! - Cancellation skips the remaining network stages; whatever was resolved
//!   is still merged and written, abandoned pairs stay missing and the run
//!   summary records `cancelled = true`
//!
//! # Example
//! ```rust,ignore
//! let pipeline = GlossaryPipeline::from_config(&config).await?;
//! let summary = pipeline.run(&CancellationToken::new()).await?;
//! ```

use crate::error::{PipelineError, PipelineResult};
use crate::fusion::LabelMerger;
use crate::services::artifact_writer::{to_pretty_json, write_atomic, ArtifactWriter};
use crate::services::corpus_reader::CorpusReader;
use crate::services::glossary_store::GlossaryStore;
use crate::services::kb_resolver::{KnowledgeBaseResolver, Resolution};
use crate::services::mt_fallback::{FallbackReport, MachineTranslationFallback, MissingLabels};
use crate::services::translation_cache::TranslationCache;
use crate::services::translation_client::TranslationClient;
use crate::services::wikidata_client::WikidataClient;
use crate::types::{LabelMap, PlantRecord, Provenance, ResolvedPlant, ScientificName};
use chrono::{DateTime, Utc};
use pcal_common::config::GlossaryConfig;
use pcal_common::LocaleCode;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Missing pairs listed individually in the end-of-run log
const MAX_LOGGED_MISSING: usize = 50;

/// Label counts by provenance for one locale
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocaleCoverage {
    pub glossary: usize,
    pub knowledge_base: usize,
    pub machine_translation: usize,
    pub missing: usize,
}

/// One unresolved (name, locale) pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MissingPair {
    pub scientific_name: ScientificName,
    pub locale: LocaleCode,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Raw corpus entries
    pub corpus_entries: usize,
    /// Unique plants resolved
    pub plants: usize,
    pub skipped_records: usize,
    pub duplicate_records: usize,
    pub kb_batches: usize,
    pub kb_failed_batches: usize,
    pub translations_requested: usize,
    pub translations_from_cache: usize,
    pub translations_failed: usize,
    pub translations_without_source: usize,
    /// Translation requests abandoned on cancellation
    pub translations_cancelled: usize,
    pub coverage: BTreeMap<LocaleCode, LocaleCoverage>,
    pub missing: Vec<MissingPair>,
    pub cancelled: bool,
    pub artifact_written: bool,
}

impl RunSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            corpus_entries: 0,
            plants: 0,
            skipped_records: 0,
            duplicate_records: 0,
            kb_batches: 0,
            kb_failed_batches: 0,
            translations_requested: 0,
            translations_from_cache: 0,
            translations_failed: 0,
            translations_without_source: 0,
            translations_cancelled: 0,
            coverage: BTreeMap::new(),
            missing: Vec::new(),
            cancelled: false,
            artifact_written: false,
        }
    }

    fn record_coverage(&mut self, resolved: &[ResolvedPlant]) {
        self.coverage.clear();
        self.missing.clear();

        for plant in resolved {
            for (locale, entry) in &plant.labels {
                let counts = self.coverage.entry(locale.clone()).or_default();
                match entry.provenance {
                    Provenance::Glossary => counts.glossary += 1,
                    Provenance::KnowledgeBase => counts.knowledge_base += 1,
                    Provenance::MachineTranslation => counts.machine_translation += 1,
                    Provenance::Missing => {
                        counts.missing += 1;
                        self.missing.push(MissingPair {
                            scientific_name: plant.scientific_name.clone(),
                            locale: locale.clone(),
                        });
                    }
                }
            }
        }
        self.missing.sort();
    }

    /// Emit the end-of-run summary
    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            plants = self.plants,
            corpus_entries = self.corpus_entries,
            skipped = self.skipped_records,
            duplicates = self.duplicate_records,
            kb_batches = self.kb_batches,
            kb_failed_batches = self.kb_failed_batches,
            translations = self.translations_requested,
            from_cache = self.translations_from_cache,
            translations_failed = self.translations_failed,
            translations_cancelled = self.translations_cancelled,
            cancelled = self.cancelled,
            artifact_written = self.artifact_written,
            "Glossary run complete"
        );

        for (locale, counts) in &self.coverage {
            info!(
                locale = %locale,
                glossary = counts.glossary,
                knowledge_base = counts.knowledge_base,
                machine_translation = counts.machine_translation,
                missing = counts.missing,
                "Locale coverage"
            );
        }

        if !self.missing.is_empty() {
            let listed = self
                .missing
                .iter()
                .take(MAX_LOGGED_MISSING)
                .map(|p| format!("{}/{}", p.scientific_name, p.locale))
                .collect::<Vec<_>>()
                .join(", ");
            warn!(
                run_id = %self.run_id,
                missing = self.missing.len(),
                pairs = %listed,
                "Labels left unresolved"
            );
        }
    }
}

/// End-to-end glossary pipeline
pub struct GlossaryPipeline {
    corpus: CorpusReader,
    glossary_path: PathBuf,
    output_path: PathBuf,
    per_locale_dir: Option<PathBuf>,
    report_path: Option<PathBuf>,
    locales: Vec<LocaleCode>,
    translate_from_existing_labels: bool,
    resolver: Option<KnowledgeBaseResolver>,
    fallback: Option<MachineTranslationFallback>,
}

impl GlossaryPipeline {
    /// Build the pipeline with the network clients named in `config`
    ///
    /// # Errors
    /// Client construction failure, or a configured cache that cannot be opened
    pub async fn from_config(config: &GlossaryConfig) -> PipelineResult<Self> {
        let resolver = match &config.knowledge_base {
            Some(kb_config) => {
                let client = WikidataClient::new(kb_config)
                    .map_err(|e| PipelineError::Client(format!("knowledge base: {}", e)))?;
                Some(KnowledgeBaseResolver::new(
                    Arc::new(client),
                    kb_config,
                    config.max_in_flight,
                ))
            }
            None => None,
        };

        let fallback = match &config.translation {
            Some(mt_config) => {
                let client = TranslationClient::new(mt_config)
                    .map_err(|e| PipelineError::Client(format!("translation: {}", e)))?;
                let cache = match &config.cache_path {
                    Some(path) => TranslationCache::open(path).await?,
                    None => TranslationCache::in_memory().await?,
                };
                Some(MachineTranslationFallback::new(
                    Arc::new(client),
                    cache,
                    mt_config.retry.clone(),
                    config.max_in_flight,
                    config.reference_locale.clone(),
                    config.locale_priority.clone(),
                ))
            }
            None => None,
        };

        Ok(Self::with_services(config, resolver, fallback))
    }

    /// Build the pipeline around already constructed stages
    ///
    /// `None` skips the stage.
    pub fn with_services(
        config: &GlossaryConfig,
        resolver: Option<KnowledgeBaseResolver>,
        fallback: Option<MachineTranslationFallback>,
    ) -> Self {
        Self {
            corpus: CorpusReader::new(config.corpus_path.clone(), config.corpus.clone()),
            glossary_path: config.glossary_path.clone(),
            output_path: config.output_path.clone(),
            per_locale_dir: config.per_locale_dir.clone(),
            report_path: config.report_path.clone(),
            locales: config.locales.clone(),
            translate_from_existing_labels: config.corpus.translate_from_existing_labels,
            resolver,
            fallback,
        }
    }

    /// Run every stage once
    ///
    /// # Errors
    /// Only fatal failures: unreadable corpus or glossary, unwritable artifact
    /// or report. Everything else is reflected in the returned summary.
    pub async fn run(&self, cancel: &CancellationToken) -> PipelineResult<RunSummary> {
        let mut summary = RunSummary::new(Uuid::new_v4(), Utc::now());
        info!(
            run_id = %summary.run_id,
            corpus = %self.corpus.path().display(),
            locales = self.locales.len(),
            "Starting glossary run"
        );

        // Phase 1: inputs
        let corpus = self.corpus.open()?;
        let scan = corpus.collect_unique();
        summary.corpus_entries = corpus.len();
        summary.plants = scan.records.len();
        summary.skipped_records = scan.skipped;
        summary.duplicate_records = scan.duplicates;

        let glossary = GlossaryStore::load(&self.glossary_path)?;
        info!(
            plants = summary.plants,
            glossary_names = glossary.len(),
            glossary_labels = glossary.label_count(),
            "Inputs loaded"
        );

        // Phase 2: knowledge base
        let kb_labels = self.resolve_knowledge_base(&scan.records, &glossary, cancel, &mut summary).await;

        // Phase 3: machine translation
        let mt_labels = self
            .fill_with_translations(&scan.records, &glossary, &kb_labels, cancel, &mut summary)
            .await;

        // Phase 4: merge
        let merger = LabelMerger::new(&self.locales);
        let resolved = merger.merge_all(
            scan.records.iter().map(|r| &r.scientific_name),
            &glossary,
            &kb_labels,
            &mt_labels,
        );
        summary.record_coverage(&resolved);

        // Phase 5: outputs (best effort when cancelled)
        if cancel.is_cancelled() {
            summary.cancelled = true;
            warn!(
                run_id = %summary.run_id,
                missing = summary.missing.len(),
                "Run cancelled; writing partial artifact"
            );
        }
        let writer = ArtifactWriter::new(&self.locales);
        writer.write(&resolved, &self.output_path)?;
        if let Some(dir) = &self.per_locale_dir {
            writer.write_per_locale(&resolved, dir)?;
        }
        summary.artifact_written = true;

        summary.finished_at = Utc::now();

        if let Some(path) = &self.report_path {
            let bytes = to_pretty_json(&summary, path)?;
            write_atomic(path, &bytes)?;
            info!(path = %path.display(), "Run report written");
        }

        Ok(summary)
    }

    async fn resolve_knowledge_base(
        &self,
        records: &[PlantRecord],
        glossary: &GlossaryStore,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> LabelMap {
        let Some(resolver) = &self.resolver else {
            return LabelMap::new();
        };
        if cancel.is_cancelled() {
            return LabelMap::new();
        }

        let mut names = BTreeSet::new();
        let mut locales = BTreeSet::new();
        for record in records {
            for locale in &self.locales {
                if glossary.lookup(&record.scientific_name, locale).is_none() {
                    names.insert(record.scientific_name.clone());
                    locales.insert(locale.clone());
                }
            }
        }

        let Resolution { labels, batches } = resolver.resolve_batch(&names, &locales, cancel).await;
        summary.kb_batches = batches.len();
        summary.kb_failed_batches = batches.iter().filter(|b| b.is_failure()).count();
        labels
    }

    async fn fill_with_translations(
        &self,
        records: &[PlantRecord],
        glossary: &GlossaryStore,
        kb_labels: &LabelMap,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> LabelMap {
        let Some(fallback) = &self.fallback else {
            return LabelMap::new();
        };
        if cancel.is_cancelled() {
            return LabelMap::new();
        }

        let pending: Vec<MissingLabels> = records
            .iter()
            .filter_map(|record| self.missing_labels(record, glossary, kb_labels))
            .collect();

        let FallbackReport {
            labels,
            requested,
            from_cache,
            failed,
            without_source,
            cancelled,
        } = fallback.fill_missing(&pending, cancel).await;

        summary.translations_requested = requested;
        summary.translations_from_cache = from_cache;
        summary.translations_failed = failed.len();
        summary.translations_without_source = without_source;
        summary.translations_cancelled = cancelled;
        labels
    }

    /// Labels resolved so far for one record, and the locales still open
    fn missing_labels(
        &self,
        record: &PlantRecord,
        glossary: &GlossaryStore,
        kb_labels: &LabelMap,
    ) -> Option<MissingLabels> {
        let name = &record.scientific_name;
        let mut resolved = BTreeMap::new();
        let mut missing = Vec::new();

        for locale in &self.locales {
            let text = glossary
                .lookup(name, locale)
                .or_else(|| kb_labels.get(&(name.clone(), locale.clone())).map(String::as_str))
                .map(str::trim)
                .filter(|t| !t.is_empty());
            match text {
                Some(text) => {
                    resolved.insert(locale.clone(), text.to_string());
                }
                None => missing.push(locale.clone()),
            }
        }

        if missing.is_empty() {
            return None;
        }

        let existing = if self.translate_from_existing_labels {
            record.existing_labels.clone()
        } else {
            BTreeMap::new()
        };

        Some(MissingLabels {
            name: name.clone(),
            resolved,
            existing,
            missing,
        })
    }
}
