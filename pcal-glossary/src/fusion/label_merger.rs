// Label Merger - Fixed-Precedence Selection
//
// Per (name, locale): glossary > knowledge base > machine translation > missing.
// Blank text counts as absent. Pure: the output depends only on the three
// inputs, never on the order names are processed in.

use crate::services::glossary_store::GlossaryStore;
use crate::types::{LabelEntry, LabelMap, Provenance, ResolvedPlant, ScientificName};
use pcal_common::LocaleCode;
use std::collections::BTreeMap;
use tracing::debug;

/// Merges per-source labels into [`ResolvedPlant`]s over a fixed locale set
#[derive(Debug, Clone)]
pub struct LabelMerger {
    locales: Vec<LocaleCode>,
}

impl LabelMerger {
    pub fn new(locales: &[LocaleCode]) -> Self {
        let mut locales = locales.to_vec();
        locales.sort();
        locales.dedup();
        Self { locales }
    }

    pub fn locales(&self) -> &[LocaleCode] {
        &self.locales
    }

    /// Resolve every configured locale for one name
    ///
    /// # Arguments
    /// * `name` - Scientific name being resolved
    /// * `glossary` - Curated labels (always win)
    /// * `kb` - Knowledge-base labels
    /// * `mt` - Machine-translation labels
    ///
    /// # Returns
    /// * `ResolvedPlant` with exactly one entry per configured locale
    pub fn merge(
        &self,
        name: &ScientificName,
        glossary: &GlossaryStore,
        kb: &LabelMap,
        mt: &LabelMap,
    ) -> ResolvedPlant {
        let mut labels = BTreeMap::new();

        for locale in &self.locales {
            let key = (name.clone(), locale.clone());

            let from_glossary = present(glossary.lookup(name, locale));
            if let (Some(curated), Some(automated)) = (from_glossary, present(kb.get(&key).map(String::as_str))) {
                if curated != automated {
                    debug!(
                        name = %name,
                        locale = %locale,
                        glossary = curated,
                        knowledge_base = automated,
                        "Knowledge-base label overridden by glossary"
                    );
                }
            }

            let (text, provenance) = from_glossary
                .map(|t| (t, Provenance::Glossary))
                .or_else(|| present(kb.get(&key).map(String::as_str)).map(|t| (t, Provenance::KnowledgeBase)))
                .or_else(|| present(mt.get(&key).map(String::as_str)).map(|t| (t, Provenance::MachineTranslation)))
                .unwrap_or(("", Provenance::Missing));

            labels.insert(
                locale.clone(),
                LabelEntry {
                    scientific_name: name.clone(),
                    locale: locale.clone(),
                    text: text.to_string(),
                    provenance,
                },
            );
        }

        ResolvedPlant {
            scientific_name: name.clone(),
            labels,
        }
    }

    /// Merge every name, sorted by scientific name
    pub fn merge_all<'a, I>(
        &self,
        names: I,
        glossary: &GlossaryStore,
        kb: &LabelMap,
        mt: &LabelMap,
    ) -> Vec<ResolvedPlant>
    where
        I: IntoIterator<Item = &'a ScientificName>,
    {
        let mut resolved: Vec<ResolvedPlant> = names
            .into_iter()
            .map(|name| self.merge(name, glossary, kb, mt))
            .collect();
        resolved.sort_by(|a, b| a.scientific_name.cmp(&b.scientific_name));
        resolved.dedup_by(|a, b| a.scientific_name == b.scientific_name);
        resolved
    }
}

fn present(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}
