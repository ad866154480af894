//! Pipeline stages and the external service clients they drive

pub mod artifact_writer;
pub mod corpus_reader;
pub mod glossary_store;
pub mod kb_resolver;
pub mod mt_fallback;
pub mod translation_cache;
pub mod translation_client;
pub mod wikidata_client;

pub use artifact_writer::{Artifact, ArtifactLabel, ArtifactWriter, SCHEMA_VERSION};
pub use corpus_reader::{Corpus, CorpusReader, CorpusScan};
pub use glossary_store::{GlossaryRecord, GlossaryStore};
pub use kb_resolver::{BatchOutcome, BatchReport, KnowledgeBaseResolver, Resolution};
pub use mt_fallback::{
    FallbackReport, FailedTranslation, MachineTranslationFallback, MissingLabels, Translation,
    TranslationOutcome,
};
pub use translation_cache::{TranslationCache, TranslationKey};
pub use translation_client::TranslationClient;
pub use wikidata_client::WikidataClient;
