//! Core types shared by the pipeline stages
//!
//! Every stage joins on `(ScientificName, LocaleCode)`. Stages exchange
//! partial results as [`LabelMap`]s (absent key = no label from that source);
//! only the merge stage produces [`ResolvedPlant`]s.
//!
//! The two external services sit behind [`KnowledgeBase`] and
//! [`TranslationProvider`] so the batching, retry and caching layers can be
//! exercised without a network.

use crate::error::{ResolutionError, TranslationError};
use async_trait::async_trait;
use pcal_common::LocaleCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Canonical scientific name (`Solanum_lycopersicum`)
///
/// Surrounding whitespace is trimmed and inner whitespace runs become a single
/// `_`, so `Solanum lycopersicum` and `Solanum_lycopersicum` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScientificName(String);

impl ScientificName {
    /// Canonicalize; `None` for blank input
    pub fn parse(raw: &str) -> Option<Self> {
        let canonical = raw.split_whitespace().collect::<Vec<_>>().join("_");
        if canonical.is_empty() {
            None
        } else {
            Some(Self(canonical))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Space-separated form used by taxonomic databases (`Solanum lycopersicum`)
    pub fn display_form(&self) -> String {
        self.0.replace('_', " ")
    }
}

impl fmt::Display for ScientificName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ScientificName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| "empty scientific name".to_string())
    }
}

impl From<ScientificName> for String {
    fn from(name: ScientificName) -> Self {
        name.0
    }
}

/// Which source produced a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Glossary,
    KnowledgeBase,
    MachineTranslation,
    Missing,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Glossary => "glossary",
            Provenance::KnowledgeBase => "knowledge-base",
            Provenance::MachineTranslation => "machine-translation",
            Provenance::Missing => "missing",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEntry {
    pub scientific_name: ScientificName,
    pub locale: LocaleCode,
    /// Empty when `provenance` is [`Provenance::Missing`]
    pub text: String,
    pub provenance: Provenance,
}

impl LabelEntry {
    pub fn is_missing(&self) -> bool {
        self.provenance == Provenance::Missing
    }
}

/// Merge output for one scientific name
///
/// Every configured locale is a key of `labels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlant {
    pub scientific_name: ScientificName,
    pub labels: BTreeMap<LocaleCode, LabelEntry>,
}

impl ResolvedPlant {
    pub fn label(&self, locale: &LocaleCode) -> Option<&LabelEntry> {
        self.labels.get(locale)
    }

    /// Locales left without a label, in locale order
    pub fn missing_locales(&self) -> impl Iterator<Item = &LocaleCode> {
        self.labels
            .iter()
            .filter(|(_, entry)| entry.is_missing())
            .map(|(locale, _)| locale)
    }
}

/// Join key for every source
pub type LabelKey = (ScientificName, LocaleCode);

/// Partial per-source results: absent key means "no label from this source"
pub type LabelMap = HashMap<LabelKey, String>;

/// One corpus record after structural validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlantRecord {
    pub scientific_name: ScientificName,
    /// Record id, when the corpus carries one
    pub id: Option<String>,
    /// Labels already present in the corpus (`locale → text`)
    pub existing_labels: BTreeMap<LocaleCode, String>,
}

// ============================================================================
// External service seams
// ============================================================================

/// Structured knowledge base returning per-locale labels for scientific names
///
/// One call is one request to the service: no retries, no batching. The
/// returned map may be partial; keys outside the requested names/locales are
/// ignored by the caller.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Service name for logging
    fn name(&self) -> &'static str;

    async fn query_labels(
        &self,
        names: &[ScientificName],
        locales: &[LocaleCode],
    ) -> Result<LabelMap, ResolutionError>;
}

/// Machine-translation provider
///
/// One call is one request: retries and caching live in the fallback stage.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Service name for logging
    fn name(&self) -> &'static str;

    async fn translate(
        &self,
        text: &str,
        source: &LocaleCode,
        target: &LocaleCode,
    ) -> Result<String, TranslationError>;
}
