// Fusion Module - combines per-source labels into resolved plants

pub mod label_merger;

pub use label_merger::LabelMerger;
