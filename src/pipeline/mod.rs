//! The cascade orchestrator.

pub mod orchestrator;

pub use orchestrator::{CoverageReport, Enricher};
