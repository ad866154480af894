//! Stage orchestration

pub mod pipeline;

pub use pipeline::{GlossaryPipeline, LocaleCoverage, MissingPair, RunSummary};
