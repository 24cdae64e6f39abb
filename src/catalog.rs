//! Per-region coordinate catalog: known (postal code, street number) positions.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{debug, info};

use crate::domain::{Coord, CoordinateRecord, MunicipalityFilter};
use crate::error::{EnrichError, Result};
use crate::normalize::{normalize_postal_code, normalize_street_number};

pub const FIELD_MUNICIPALITY_CODE: &str = "municipality_code";
pub const FIELD_POSTAL_CODE: &str = "postal_code";
pub const FIELD_STREET_NUMBER: &str = "street_number";
pub const FIELD_LATITUDE: &str = "latitude";
pub const FIELD_LONGITUDE: &str = "longitude";

pub const REQUIRED_FIELDS: [&str; 5] = [
    FIELD_MUNICIPALITY_CODE,
    FIELD_POSTAL_CODE,
    FIELD_STREET_NUMBER,
    FIELD_LATITUDE,
    FIELD_LONGITUDE,
];

/// Location of the catalog file for `region` inside `dir`.
pub fn catalog_path(dir: &Path, region: &str) -> PathBuf {
    dir.join(format!("coord_{}.csv", region.trim().to_uppercase()))
}

/// Read-only reference table for one enrichment run.
#[derive(Debug, Clone)]
pub struct CoordinateCatalog {
    region: String,
    records: Vec<CoordinateRecord>,
}

struct Columns {
    municipality_code: usize,
    postal_code: usize,
    street_number: usize,
    latitude: usize,
    longitude: usize,
}

impl Columns {
    fn locate(headers: &StringRecord, source: &Path) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let mut missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|name| find(name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(EnrichError::Schema {
                path: source.to_path_buf(),
                missing,
            });
        }
        let index = |name: &str| find(name).unwrap_or_default();
        Ok(Self {
            municipality_code: index(FIELD_MUNICIPALITY_CODE),
            postal_code: index(FIELD_POSTAL_CODE),
            street_number: index(FIELD_STREET_NUMBER),
            latitude: index(FIELD_LATITUDE),
            longitude: index(FIELD_LONGITUDE),
        })
    }
}

fn parse_float(value: Option<&str>) -> Option<f64> {
    value.and_then(|v| v.trim().parse::<f64>().ok())
}

impl CoordinateCatalog {
    /// Loads `coord_<REGION>.csv` from `dir`.
    pub fn load(dir: &Path, region: &str, filter: Option<&MunicipalityFilter>) -> Result<Self> {
        let path = catalog_path(dir, region);
        if !path.is_file() {
            return Err(EnrichError::CatalogNotFound {
                region: region.trim().to_uppercase(),
                path,
            });
        }
        let file = File::open(&path)?;
        Self::from_reader(region, file, &path, filter)
    }

    /// Parses a catalog from any CSV source; `source` is only used in error messages.
    pub fn from_reader<R: Read>(
        region: &str,
        reader: R,
        source: &Path,
        filter: Option<&MunicipalityFilter>,
    ) -> Result<Self> {
        let region = region.trim().to_uppercase();
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns = Columns::locate(csv_reader.headers()?, source)?;
        let filter = filter.filter(|f| !f.is_empty());

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut records = Vec::new();
        let mut discarded = 0usize;

        for row in csv_reader.records() {
            let row = row?;
            let municipality_code = row.get(columns.municipality_code).unwrap_or("").trim();
            if let Some(filter) = filter {
                if !filter.contains(municipality_code) {
                    continue;
                }
            }

            let street_number =
                normalize_street_number(row.get(columns.street_number).unwrap_or(""));
            let coord = Coord::new(
                parse_float(row.get(columns.latitude)).unwrap_or(f64::NAN),
                parse_float(row.get(columns.longitude)).unwrap_or(f64::NAN),
            );
            let coord = match coord {
                Some(coord) if !street_number.is_empty() => coord,
                _ => {
                    discarded += 1;
                    continue;
                }
            };

            let postal_code = normalize_postal_code(row.get(columns.postal_code).unwrap_or(""));
            if !seen.insert((postal_code.clone(), street_number.clone())) {
                continue;
            }

            records.push(CoordinateRecord {
                region_code: region.clone(),
                municipality_code: municipality_code.to_string(),
                street_number_value: street_number.parse().ok(),
                postal_code,
                street_number,
                coord,
            });
        }

        debug!(region = %region, discarded, "Discarded unusable catalog rows");
        info!(
            region = %region,
            rows = records.len(),
            municipalities = filter.map(|f| f.len()).unwrap_or(0),
            "Coordinate catalog loaded"
        );

        Ok(Self { region, records })
    }

    /// Builds a catalog from rows that are already normalized and unique.
    pub fn from_records(region: &str, records: Vec<CoordinateRecord>) -> Self {
        Self {
            region: region.trim().to_uppercase(),
            records,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn records(&self) -> &[CoordinateRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows usable by nearest-number matching.
    pub fn numeric_len(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.street_number_value.is_some())
            .count()
    }

    pub fn postal_code_count(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.postal_code.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}
