//! pcal-glossary library
//!
//! Multilingual plant-name glossary pipeline: reconciles the scientific names
//! of a plant corpus into per-locale common names from a curated glossary, a
//! knowledge base and machine translation, and writes a stable artifact.
//!
//! Exposes every stage for the binary and for integration testing.

pub mod error;
pub mod fusion;
pub mod services;
pub mod types;
pub mod utils;
pub mod workflow;

pub use crate::error::{PipelineError, PipelineResult};
pub use crate::types::{
    KnowledgeBase, LabelEntry, LabelMap, PlantRecord, Provenance, ResolvedPlant, ScientificName,
    TranslationProvider,
};
pub use crate::workflow::{GlossaryPipeline, RunSummary};
