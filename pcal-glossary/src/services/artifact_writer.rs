//! Artifact Writer
//!
//! Serializes resolved plants into the translation artifact the application
//! ships, plus optional per-locale name files.
//!
//! Output is pretty JSON with every map sorted by key and no timestamps, so
//! identical input gives byte-identical files. Files are written to a
//! temporary sibling and renamed over the destination: readers see either
//! the previous artifact or the new one, never a partial write.

use crate::error::ArtifactWriteError;
use crate::types::{Provenance, ResolvedPlant, ScientificName};
use pcal_common::LocaleCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

/// Artifact format version
pub const SCHEMA_VERSION: u32 = 1;

/// On-disk artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub schema_version: u32,
    pub locales: Vec<LocaleCode>,
    pub plants: BTreeMap<ScientificName, BTreeMap<LocaleCode, ArtifactLabel>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLabel {
    pub text: String,
    pub provenance: Provenance,
}

/// Writes the artifact for a fixed locale set
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    locales: Vec<LocaleCode>,
}

impl ArtifactWriter {
    pub fn new(locales: &[LocaleCode]) -> Self {
        let mut locales = locales.to_vec();
        locales.sort();
        locales.dedup();
        Self { locales }
    }

    fn artifact(&self, resolved: &[ResolvedPlant]) -> Artifact {
        let plants = resolved
            .iter()
            .map(|plant| {
                let labels = plant
                    .labels
                    .iter()
                    .map(|(locale, entry)| {
                        (
                            locale.clone(),
                            ArtifactLabel {
                                text: entry.text.clone(),
                                provenance: entry.provenance,
                            },
                        )
                    })
                    .collect();
                (plant.scientific_name.clone(), labels)
            })
            .collect();

        Artifact {
            schema_version: SCHEMA_VERSION,
            locales: self.locales.clone(),
            plants,
        }
    }

    /// Serialized artifact bytes
    pub fn render(&self, resolved: &[ResolvedPlant], path: &Path) -> Result<Vec<u8>, ArtifactWriteError> {
        to_pretty_json(&self.artifact(resolved), path)
    }

    /// Atomically write the artifact to `path`
    pub fn write(&self, resolved: &[ResolvedPlant], path: &Path) -> Result<(), ArtifactWriteError> {
        let bytes = self.render(resolved, path)?;
        write_atomic(path, &bytes)?;

        info!(
            path = %path.display(),
            plants = resolved.len(),
            bytes = bytes.len(),
            "Translation artifact written"
        );
        Ok(())
    }

    /// Write `plant_names_<locale>.json` per locale into `dir`
    ///
    /// Each file maps scientific name → text for that locale's resolved
    /// labels only.
    pub fn write_per_locale(
        &self,
        resolved: &[ResolvedPlant],
        dir: &Path,
    ) -> Result<Vec<PathBuf>, ArtifactWriteError> {
        let mut written = Vec::with_capacity(self.locales.len());

        for locale in &self.locales {
            let names: BTreeMap<&ScientificName, &str> = resolved
                .iter()
                .filter_map(|plant| {
                    let entry = plant.label(locale)?;
                    (!entry.is_missing()).then(|| (&plant.scientific_name, entry.text.as_str()))
                })
                .collect();

            let path = dir.join(per_locale_file_name(locale));
            let bytes = to_pretty_json(&names, &path)?;
            write_atomic(&path, &bytes)?;
            written.push(path);
        }

        info!(dir = %dir.display(), files = written.len(), "Per-locale name files written");
        Ok(written)
    }
}

pub fn per_locale_file_name(locale: &LocaleCode) -> String {
    format!("plant_names_{}.json", locale)
}

/// Pretty JSON (2-space indent) with a trailing newline
pub(crate) fn to_pretty_json<T: Serialize>(value: &T, path: &Path) -> Result<Vec<u8>, ArtifactWriteError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| ArtifactWriteError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Write to a temp file in the destination directory, then rename over `path`
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactWriteError> {
    let io_error = |source| ArtifactWriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(io_error)?;

    let mut temp_file = NamedTempFile::new_in(parent).map_err(io_error)?;
    temp_file.write_all(bytes).map_err(io_error)?;
    temp_file.as_file().sync_all().map_err(io_error)?;
    temp_file.persist(path).map_err(|e| io_error(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LabelEntry;

    fn locale(raw: &str) -> LocaleCode {
        LocaleCode::parse(raw).unwrap()
    }

    fn plant(name: &str, labels: &[(&str, &str, Provenance)]) -> ResolvedPlant {
        let scientific_name = ScientificName::parse(name).unwrap();
        ResolvedPlant {
            labels: labels
                .iter()
                .map(|(l, text, provenance)| {
                    (
                        locale(l),
                        LabelEntry {
                            scientific_name: scientific_name.clone(),
                            locale: locale(l),
                            text: text.to_string(),
                            provenance: *provenance,
                        },
                    )
                })
                .collect(),
            scientific_name,
        }
    }

    fn sample() -> Vec<ResolvedPlant> {
        vec![
            plant(
                "Solanum_lycopersicum",
                &[("fr", "Tomate", Provenance::Glossary), ("en", "Tomato", Provenance::KnowledgeBase)],
            ),
            plant(
                "Daucus_carota",
                &[("fr", "Carotte", Provenance::Glossary), ("en", "", Provenance::Missing)],
            ),
        ]
    }

    #[test]
    fn test_render_sorted_and_stable() {
        let writer = ArtifactWriter::new(&[locale("fr"), locale("en")]);
        let path = Path::new("artifact.json");

        let bytes = writer.render(&sample(), path).unwrap();
        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(bytes, writer.render(&reversed, path).unwrap());

        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.starts_with("{\n  \"schema_version\": 1,\n  \"locales\": [\n    \"en\",\n    \"fr\"\n  ],"));
        let carrot = text.find("Daucus_carota").unwrap();
        let tomato = text.find("Solanum_lycopersicum").unwrap();
        assert!(carrot < tomato);
        assert!(text.contains("\"provenance\": \"knowledge-base\""));
    }

    #[test]
    fn test_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("plant_names.json");
        let writer = ArtifactWriter::new(&[locale("fr"), locale("en")]);

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale").unwrap();
        writer.write(&sample(), &path).unwrap();

        let artifact: Artifact = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(artifact.schema_version, SCHEMA_VERSION);
        assert_eq!(artifact.plants.len(), 2);

        // No temp files left behind
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_unwritable_destination_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "file").unwrap();
        let path = blocker.join("artifact.json");

        let writer = ArtifactWriter::new(&[locale("fr")]);
        let err = writer.write(&sample(), &path).unwrap_err();
        assert!(matches!(err, ArtifactWriteError::Io { .. }));
        assert!(err.to_string().contains("artifact.json"));
    }

    #[test]
    fn test_per_locale_files_hold_resolved_labels_only() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(&[locale("fr"), locale("en")]);

        let written = writer.write_per_locale(&sample(), dir.path()).unwrap();
        assert_eq!(written.len(), 2);

        let en: BTreeMap<String, String> =
            serde_json::from_slice(&std::fs::read(dir.path().join("plant_names_en.json")).unwrap()).unwrap();
        assert_eq!(en.len(), 1);
        assert_eq!(en.get("Solanum_lycopersicum").map(String::as_str), Some("Tomato"));

        let fr: BTreeMap<String, String> =
            serde_json::from_slice(&std::fs::read(dir.path().join("plant_names_fr.json")).unwrap()).unwrap();
        assert_eq!(fr.len(), 2);
    }
}
