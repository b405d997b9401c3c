//! mdx-batch library
//!
//! Batch analysis ingest: runs the structure-analysis engine over audio
//! files and publishes results, stems and auxiliary artifacts through the
//! mdx-common stores.

pub mod engine;
pub mod orchestrator;
pub mod scanner;
pub mod strategy;

pub use engine::{AnalysisEngine, CommandEngine, EngineError, EngineOutput, RenderRequest};
pub use orchestrator::{
    AnalysisMetadata, BatchError, BatchOptions, BatchOrchestrator, BatchReport, FailureKind,
    FileOutcome,
};
pub use scanner::InputScanner;
pub use strategy::{ExecutionStrategy, ResourcePolicy};
