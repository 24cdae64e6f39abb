use std::collections::HashMap;

use tracing::info;

use crate::catalog::CoordinateCatalog;
use crate::domain::{Coord, EstablishmentRecord, Provenance};

use super::{resolved_count, Matcher};

/// Equality join on (postal code, street number).
pub struct ExactMatcher {
    /// postal code -> street number -> coordinate
    index: HashMap<String, HashMap<String, Coord>>,
}

impl ExactMatcher {
    pub fn new(catalog: &CoordinateCatalog) -> Self {
        let mut index: HashMap<String, HashMap<String, Coord>> = HashMap::new();
        for record in catalog.records() {
            index
                .entry(record.postal_code.clone())
                .or_default()
                .entry(record.street_number.clone())
                .or_insert(record.coord);
        }
        Self { index }
    }

    pub fn lookup(&self, postal_code: &str, street_number: &str) -> Option<Coord> {
        if postal_code.is_empty() || street_number.is_empty() {
            return None;
        }
        self.index.get(postal_code)?.get(street_number).copied()
    }
}

impl Matcher for ExactMatcher {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn apply(&self, records: &mut [EstablishmentRecord]) -> usize {
        let mut matched = 0;
        for record in records.iter_mut().filter(|r| !r.is_resolved()) {
            let candidate = self.lookup(&record.postal_code, &record.street_number);
            if record.resolve(Provenance::Exact, candidate) {
                matched += 1;
            }
        }
        info!(
            matched,
            resolved = resolved_count(records),
            "Exact match finished"
        );
        matched
    }
}
