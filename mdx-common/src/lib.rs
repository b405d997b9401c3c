//! # Music Dissector Common Library
//!
//! Shared code for the mdx binaries including:
//! - Analysis result model and schema validation
//! - Track identifiers and stem names
//! - On-disk artifact layout
//! - Result, media and artifact stores
//! - Configuration loading and root folder resolution
//! - Batch event bus

pub mod config;
pub mod error;
pub mod events;
pub mod layout;
pub mod model;
pub mod store;
pub mod summary;
pub mod track;

pub use error::{Error, Result};
pub use layout::{LayoutKind, MediaFormat, StorageLayout};
pub use model::{AnalysisResult, Segment, SegmentLabel, ValidationPolicy};
pub use track::{Stem, TrackId};
