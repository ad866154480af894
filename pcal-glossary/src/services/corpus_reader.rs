//! Corpus Reader
//!
//! Loads the plant corpus and yields structurally valid [`PlantRecord`]s.
//!
//! Accepted shapes:
//! - `{"plants": [...], "metadata": {...}}` (metadata ignored)
//! - `{"plants": {"<id>": {...}}}`
//! - `[...]`
//! - `{"<id>": {...}, ...}`
//!
//! Records without a non-empty scientific name (or that are not JSON
//! objects) are skipped and counted. Nothing else is transformed.
//!
//! The file is streamed through a serde visitor: each entry is reduced to a
//! [`PlantRecord`] (or a skip marker) as soon as it is read, so the raw JSON
//! document is never held in memory as a whole.

use crate::error::CorpusReadError;
use crate::types::{PlantRecord, ScientificName};
use pcal_common::config::CorpusOptions;
use pcal_common::LocaleCode;
use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::error::Category;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reads the corpus at a fixed path
///
/// Each [`CorpusReader::open`] re-reads the file from the start, so a run can
/// be restarted against a grown corpus without any carried state.
pub struct CorpusReader {
    path: PathBuf,
    options: CorpusOptions,
}

impl CorpusReader {
    pub fn new(path: impl Into<PathBuf>, options: CorpusOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and structurally validate the corpus file
    ///
    /// # Errors
    /// - file absent or unreadable
    /// - content is not JSON
    /// - top level is neither an array nor an object
    pub fn open(&self) -> Result<Corpus, CorpusReadError> {
        let file = File::open(&self.path).map_err(|source| CorpusReadError::Io {
            path: self.path.clone(),
            source,
        })?;

        let mut deserializer = serde_json::Deserializer::from_reader(BufReader::new(file));
        let entries = EntriesSeed {
            options: &self.options,
            top_level: true,
        }
        .deserialize(&mut deserializer)
        .and_then(|entries| deserializer.end().map(|()| entries))
        .map_err(|source| self.read_error(source))?;

        info!(
            path = %self.path.display(),
            entries = entries.len(),
            "Corpus loaded"
        );

        Ok(Corpus { entries })
    }

    fn read_error(&self, source: serde_json::Error) -> CorpusReadError {
        let path = self.path.clone();
        match source.classify() {
            Category::Io => CorpusReadError::Io {
                path,
                source: source.into(),
            },
            // Only the shape checks in the visitors produce data errors
            Category::Data => CorpusReadError::Structure {
                path,
                reason: source.to_string(),
            },
            Category::Syntax | Category::Eof => CorpusReadError::Parse { path, source },
        }
    }
}

/// One corpus entry, reduced while reading
enum Entry {
    Record(PlantRecord),
    /// Entry without a usable scientific name, with its id key if any
    Skipped(Option<String>),
}

impl Entry {
    fn reduce(key: Option<String>, value: &Value, options: &CorpusOptions) -> Self {
        match parse_record(key.as_deref(), value, options) {
            Some(record) => Entry::Record(record),
            None => Entry::Skipped(key),
        }
    }
}

/// Deserializes the corpus document, or the value of its `plants` field
struct EntriesSeed<'a> {
    options: &'a CorpusOptions,
    /// Only the document root may wrap its entries in `plants`
    top_level: bool,
}

impl<'de> DeserializeSeed<'de> for EntriesSeed<'_> {
    type Value = Vec<Entry>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for EntriesSeed<'_> {
    type Value = Vec<Entry>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        if self.top_level {
            formatter.write_str("an array of plant records or an object keyed by plant id")
        } else {
            formatter.write_str("'plants' as an array or an object keyed by plant id")
        }
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut entries = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(value) = seq.next_element::<Value>()? {
            entries.push(Entry::reduce(None, &value, self.options));
        }
        Ok(entries)
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut keyed = Vec::new();
        let mut plants = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "plants" if self.top_level => {
                    plants = Some(map.next_value_seed(EntriesSeed {
                        options: self.options,
                        top_level: false,
                    })?);
                }
                "metadata" => {
                    map.next_value::<IgnoredAny>()?;
                }
                _ => {
                    let value: Value = map.next_value()?;
                    keyed.push(Entry::reduce(Some(key), &value, self.options));
                }
            }
        }

        // A `plants` wrapper takes the place of any sibling keys
        Ok(plants.unwrap_or(keyed))
    }
}

/// A loaded corpus; records are yielded lazily on iteration
pub struct Corpus {
    entries: Vec<Entry>,
}

impl Corpus {
    /// Raw entry count, including entries that will be skipped
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate valid records in corpus order
    pub fn records(&self) -> CorpusRecords<'_> {
        CorpusRecords {
            entries: self.entries.iter(),
            skipped: 0,
        }
    }

    /// Collect records, keeping the first occurrence of each scientific name
    pub fn collect_unique(&self) -> CorpusScan {
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut duplicates = 0usize;

        let mut iter = self.records();
        for record in iter.by_ref() {
            if seen.insert(record.scientific_name.clone()) {
                records.push(record);
            } else {
                duplicates += 1;
                debug!(name = %record.scientific_name, "Duplicate scientific name in corpus, keeping first");
            }
        }
        let skipped = iter.skipped();

        if skipped > 0 {
            warn!(skipped, "Corpus records without a scientific name were skipped");
        }
        if duplicates > 0 {
            warn!(duplicates, "Duplicate scientific names in corpus were ignored");
        }

        CorpusScan {
            records,
            skipped,
            duplicates,
        }
    }
}

/// Result of a full corpus pass
#[derive(Debug, Clone, Default)]
pub struct CorpusScan {
    pub records: Vec<PlantRecord>,
    /// Entries without a usable scientific name
    pub skipped: usize,
    /// Repeated scientific names after the first
    pub duplicates: usize,
}

/// Lazy record iterator; [`CorpusRecords::skipped`] counts rejected entries so far
pub struct CorpusRecords<'a> {
    entries: std::slice::Iter<'a, Entry>,
    skipped: usize,
}

impl CorpusRecords<'_> {
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for CorpusRecords<'_> {
    type Item = PlantRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.entries.by_ref() {
            match entry {
                Entry::Record(record) => return Some(record.clone()),
                Entry::Skipped(key) => {
                    self.skipped += 1;
                    debug!(key = ?key, "Skipping corpus record without scientific name");
                }
            }
        }
        None
    }
}

fn parse_record(key: Option<&str>, value: &Value, options: &CorpusOptions) -> Option<PlantRecord> {
    let object = value.as_object()?;

    let scientific_name = options
        .name_fields
        .iter()
        .filter_map(|field| object.get(field).and_then(Value::as_str))
        .find_map(ScientificName::parse)?;

    let id = object
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| key.map(str::to_string));

    let mut existing_labels = BTreeMap::new();
    if let Some(labels) = object.get(&options.labels_field).and_then(Value::as_object) {
        for (raw_locale, text) in labels {
            let (Ok(locale), Some(text)) = (LocaleCode::parse(raw_locale), text.as_str()) else {
                continue;
            };
            let text = text.trim();
            if !text.is_empty() {
                existing_labels.insert(locale, text.to_string());
            }
        }
    }

    Some(PlantRecord {
        scientific_name,
        id,
        existing_labels,
    })
}
