//! Glossary Store
//!
//! The hand-curated `scientificName → {locale: text}` seed. Loaded once,
//! read-only afterwards, and always authoritative in the merge.
//!
//! Blank texts are dropped at load time: a blank glossary cell means "not
//! reviewed yet" and defers to the next source, it never produces an empty
//! label.

use crate::error::GlossaryLoadError;
use crate::types::ScientificName;
use pcal_common::LocaleCode;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Immutable glossary contents
pub type GlossaryRecord = BTreeMap<ScientificName, BTreeMap<LocaleCode, String>>;

/// Read-only view over a loaded glossary
#[derive(Debug, Clone, Default)]
pub struct GlossaryStore {
    record: GlossaryRecord,
}

impl GlossaryStore {
    /// Load the glossary seed file
    pub fn load(path: &Path) -> Result<Self, GlossaryLoadError> {
        let file = File::open(path).map_err(|source| GlossaryLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let raw: BTreeMap<String, BTreeMap<String, Value>> =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                GlossaryLoadError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        let store = Self::from_raw(path.to_path_buf(), raw)?;

        info!(
            path = %path.display(),
            names = store.record.len(),
            labels = store.label_count(),
            "Glossary loaded"
        );

        Ok(store)
    }

    fn from_raw(
        path: PathBuf,
        raw: BTreeMap<String, BTreeMap<String, Value>>,
    ) -> Result<Self, GlossaryLoadError> {
        let invalid = |entry: &str, reason: String| GlossaryLoadError::InvalidEntry {
            path: path.clone(),
            entry: entry.to_string(),
            reason,
        };

        let mut record = GlossaryRecord::new();
        for (raw_name, raw_labels) in raw {
            let name = ScientificName::parse(&raw_name)
                .ok_or_else(|| invalid(&raw_name, "empty scientific name".to_string()))?;
            let labels = record.entry(name).or_default();

            for (raw_locale, value) in raw_labels {
                let entry_id = format!("{}.{}", raw_name, raw_locale);
                let locale = LocaleCode::parse(&raw_locale)
                    .map_err(|e| invalid(&entry_id, e.to_string()))?;
                let text = match value {
                    Value::String(text) => text.trim().to_string(),
                    Value::Null => String::new(),
                    other => {
                        return Err(invalid(&entry_id, format!("expected text, found {}", other)))
                    }
                };

                if text.is_empty() {
                    warn!(entry = %entry_id, "Blank glossary label ignored");
                    continue;
                }

                if let Some(existing) = labels.get(&locale) {
                    if *existing != text {
                        return Err(invalid(
                            &entry_id,
                            format!("conflicts with '{}' for the same name and locale", existing),
                        ));
                    }
                }
                labels.insert(locale, text);
            }
        }

        record.retain(|_, labels| !labels.is_empty());
        Ok(Self { record })
    }

    /// Build directly from contents
    pub fn from_record(record: GlossaryRecord) -> Self {
        let mut record = record;
        for labels in record.values_mut() {
            labels.retain(|_, text| !text.trim().is_empty());
        }
        record.retain(|_, labels| !labels.is_empty());
        Self { record }
    }

    /// Curated label, if reviewed
    pub fn lookup(&self, name: &ScientificName, locale: &LocaleCode) -> Option<&str> {
        self.record
            .get(name)
            .and_then(|labels| labels.get(locale))
            .map(String::as_str)
    }

    pub fn labels_for(&self, name: &ScientificName) -> Option<&BTreeMap<LocaleCode, String>> {
        self.record.get(name)
    }

    pub fn record(&self) -> &GlossaryRecord {
        &self.record
    }

    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    pub fn label_count(&self) -> usize {
        self.record.values().map(BTreeMap::len).sum()
    }
}
