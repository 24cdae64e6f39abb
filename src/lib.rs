pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod matching;
pub mod normalize;
pub mod observability;
pub mod pipeline;
pub mod storage;

// Application layer (use cases and ports) and the adapters behind the ports
pub mod app;
pub mod infra;

pub use catalog::CoordinateCatalog;
pub use config::Config;
pub use domain::{Coord, EstablishmentRecord, MunicipalityFilter, Provenance, RawEstablishment};
pub use error::{EnrichError, GeocodeError, Result};
pub use pipeline::{CoverageReport, Enricher};
