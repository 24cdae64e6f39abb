//! Record shapes shared by every stage of the cascade.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A latitude/longitude pair. Both halves are always finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coord {
    /// Returns `None` unless both values are finite.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if latitude.is_finite() && longitude.is_finite() {
            Some(Self {
                latitude,
                longitude,
            })
        } else {
            None
        }
    }

    /// The service area lies entirely south of the equator and west of Greenwich.
    pub fn in_service_area(&self) -> bool {
        self.latitude < 0.0 && self.longitude < 0.0
    }
}

/// Fill-only merge applied at every stage boundary: an existing coordinate always wins.
pub fn merge(existing: Option<Coord>, candidate: Option<Coord>) -> Option<Coord> {
    existing.or(candidate)
}

/// Which stage produced a row's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Coordinates were already present on input.
    Prior,
    Exact,
    Approximate,
    Geocoder,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Prior => "prior",
            Provenance::Exact => "exact",
            Provenance::Approximate => "approximate",
            Provenance::Geocoder => "geocoder",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a region's coordinate catalog, after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateRecord {
    pub region_code: String,
    pub municipality_code: String,
    /// Eight digit postal code.
    pub postal_code: String,
    /// Digits only, never empty.
    pub street_number: String,
    /// `None` when the digit string does not fit a `u64`.
    pub street_number_value: Option<u64>,
    pub coord: Coord,
}

/// An establishment row as read from a batch file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawEstablishment {
    pub id_base: String,
    pub id_order: String,
    pub id_check_digit: String,
    pub display_name: String,
    pub street_type: String,
    pub street_name: String,
    pub street_number: String,
    pub neighborhood: String,
    pub postal_code: String,
    pub region_code: String,
    pub municipality_code: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub latitude: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub longitude: Option<f64>,
}

/// An establishment in the working set of the cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct EstablishmentRecord {
    pub composite_id: String,
    pub id_base: String,
    pub id_order: String,
    pub id_check_digit: String,
    pub display_name: String,
    pub street_type: String,
    pub street_name: String,
    /// Digits only; may be empty.
    pub street_number: String,
    pub neighborhood: String,
    /// Eight digit postal code, or empty when the input had no digits.
    pub postal_code: String,
    pub region_code: String,
    pub municipality_code: String,
    coord: Option<Coord>,
    provenance: Option<Provenance>,
}

impl EstablishmentRecord {
    pub(crate) fn from_parts(
        composite_id: String,
        raw: RawEstablishment,
        street_number: String,
        postal_code: String,
        prior: Option<Coord>,
    ) -> Self {
        Self {
            composite_id,
            id_base: raw.id_base,
            id_order: raw.id_order,
            id_check_digit: raw.id_check_digit,
            display_name: raw.display_name,
            street_type: raw.street_type,
            street_name: raw.street_name,
            street_number,
            neighborhood: raw.neighborhood,
            postal_code,
            region_code: raw.region_code.trim().to_uppercase(),
            municipality_code: raw.municipality_code,
            provenance: prior.map(|_| Provenance::Prior),
            coord: prior,
        }
    }

    pub fn coord(&self) -> Option<Coord> {
        self.coord
    }

    pub fn provenance(&self) -> Option<Provenance> {
        self.provenance
    }

    pub fn is_resolved(&self) -> bool {
        self.coord.is_some()
    }

    /// Numeric value of the street number, if it has one.
    pub fn street_number_value(&self) -> Option<u64> {
        self.street_number.parse().ok()
    }

    /// Offers a candidate coordinate from `stage`.
    ///
    /// Returns `true` only when the row was unresolved and is now resolved.
    pub fn resolve(&mut self, stage: Provenance, candidate: Option<Coord>) -> bool {
        let was_resolved = self.is_resolved();
        self.coord = merge(self.coord, candidate);
        if !was_resolved && self.is_resolved() {
            self.provenance = Some(stage);
            true
        } else {
            false
        }
    }
}

/// Municipality codes that restrict which catalog rows are loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MunicipalityFilter {
    codes: HashSet<u64>,
}

impl MunicipalityFilter {
    pub fn new<I: IntoIterator<Item = u64>>(codes: I) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    /// Parses a comma separated list such as `5002704,5002472`.
    pub fn parse(list: &str) -> Option<Self> {
        let codes = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u64>().ok())
            .collect::<Option<HashSet<_>>>()?;
        Some(Self { codes })
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Codes are compared numerically, so `0050027` and `50027` are the same municipality.
    pub fn contains(&self, code: &str) -> bool {
        code.trim()
            .parse::<u64>()
            .map(|c| self.codes.contains(&c))
            .unwrap_or(false)
    }
}
