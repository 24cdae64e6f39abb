use std::collections::HashMap;
use std::ops::Range;

use tracing::info;

use crate::catalog::CoordinateCatalog;
use crate::domain::{Coord, EstablishmentRecord, Provenance};

use super::{resolved_count, Matcher};

#[derive(Debug, Clone, Copy)]
struct Entry {
    number: u64,
    coord: Coord,
}

/// Nearest street number within the same postal code.
///
/// Catalog rows are sorted once by (postal code, number) and establishments
/// once by the same key, so each postal-code group is a single forward merge.
/// On equal distance the smaller catalog number wins.
pub struct ApproximateMatcher {
    entries: Vec<Entry>,
    groups: HashMap<String, Range<usize>>,
}

impl ApproximateMatcher {
    pub fn new(catalog: &CoordinateCatalog) -> Self {
        let mut numeric: Vec<(&str, u64, Coord)> = catalog
            .records()
            .iter()
            .filter_map(|r| {
                r.street_number_value
                    .map(|n| (r.postal_code.as_str(), n, r.coord))
            })
            .collect();
        // Stable, so among rows with the same numeric value the first loaded survives the dedup.
        numeric.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        numeric.dedup_by(|next, kept| next.0 == kept.0 && next.1 == kept.1);

        let mut entries = Vec::with_capacity(numeric.len());
        let mut groups: HashMap<String, Range<usize>> = HashMap::new();
        for (postal_code, number, coord) in numeric {
            let at = entries.len();
            groups
                .entry(postal_code.to_string())
                .and_modify(|range| range.end = at + 1)
                .or_insert(at..at + 1);
            entries.push(Entry { number, coord });
        }

        Self { entries, groups }
    }

    /// Number of postal codes that have at least one numeric catalog row.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Single lookup by binary search.
    pub fn nearest(&self, postal_code: &str, number: u64) -> Option<Coord> {
        let range = self.groups.get(postal_code)?.clone();
        let upper = range.start
            + self.entries[range.clone()].partition_point(|e| e.number < number);
        Some(self.pick(range, upper, number))
    }

    /// `upper` is the first index in `range` whose number is >= `number`, or `range.end`.
    fn pick(&self, range: Range<usize>, upper: usize, number: u64) -> Coord {
        if upper == range.end {
            return self.entries[range.end - 1].coord;
        }
        if upper == range.start {
            return self.entries[range.start].coord;
        }
        let below = self.entries[upper - 1];
        let above = self.entries[upper];
        if above.number - number < number - below.number {
            above.coord
        } else {
            below.coord
        }
    }
}

impl Matcher for ApproximateMatcher {
    fn name(&self) -> &'static str {
        "approximate"
    }

    fn apply(&self, records: &mut [EstablishmentRecord]) -> usize {
        let mut candidates: Vec<(Range<usize>, u64, usize)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_resolved())
            .filter_map(|(row, r)| {
                let number = r.street_number_value()?;
                let range = self.groups.get(&r.postal_code)?.clone();
                Some((range, number, row))
            })
            .collect();
        candidates.sort_by_key(|(range, number, _)| (range.start, *number));

        let mut found = Vec::with_capacity(candidates.len());
        let mut group_start = None;
        let mut cursor = 0;
        for (range, number, row) in candidates {
            if group_start != Some(range.start) {
                group_start = Some(range.start);
                cursor = range.start;
            }
            while cursor < range.end && self.entries[cursor].number < number {
                cursor += 1;
            }
            found.push((row, self.pick(range, cursor, number)));
        }

        let mut matched = 0;
        for (row, coord) in found {
            if records[row].resolve(Provenance::Approximate, Some(coord)) {
                matched += 1;
            }
        }
        info!(
            matched,
            resolved = resolved_count(records),
            "Approximate match finished"
        );
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CoordinateRecord, RawEstablishment};
    use crate::normalize::normalize_record;

    fn row(postal_code: &str, number: &str, lat: f64) -> CoordinateRecord {
        CoordinateRecord {
            region_code: "RJ".to_string(),
            municipality_code: "3304557".to_string(),
            postal_code: postal_code.to_string(),
            street_number: number.to_string(),
            street_number_value: number.parse().ok(),
            coord: Coord::new(lat, -43.0).unwrap(),
        }
    }

    fn establishment(postal_code: &str, number: &str) -> EstablishmentRecord {
        normalize_record(RawEstablishment {
            postal_code: postal_code.to_string(),
            street_number: number.to_string(),
            ..Default::default()
        })
    }

    fn matcher() -> ApproximateMatcher {
        ApproximateMatcher::new(&CoordinateCatalog::from_records(
            "RJ",
            vec![
                row("20000000", "30", -30.0),
                row("20000000", "10", -10.0),
                row("21000000", "5", -5.0),
            ],
        ))
    }

    #[test]
    fn test_nearest_with_tie_going_to_smaller_number() {
        let matcher = matcher();
        let mut batch = vec![
            establishment("20000000", "18"),
            establishment("20000000", "21"),
            establishment("20000000", "20"),
        ];

        assert_eq!(matcher.apply(&mut batch), 3);
        assert_eq!(batch[0].coord().unwrap().latitude, -10.0);
        assert_eq!(batch[1].coord().unwrap().latitude, -30.0);
        assert_eq!(batch[2].coord().unwrap().latitude, -10.0);
        assert!(batch
            .iter()
            .all(|r| r.provenance() == Some(Provenance::Approximate)));
    }

    #[test]
    fn test_numbers_outside_the_catalog_range() {
        let matcher = matcher();
        assert_eq!(matcher.nearest("20000000", 0).unwrap().latitude, -10.0);
        assert_eq!(matcher.nearest("20000000", 9999).unwrap().latitude, -30.0);
        assert_eq!(matcher.nearest("21000000", 7).unwrap().latitude, -5.0);
        assert!(matcher.nearest("99999999", 7).is_none());
    }

    #[test]
    fn test_merge_agrees_with_binary_search() {
        let matcher = matcher();
        let numbers = ["0", "9", "10", "11", "19", "20", "21", "29", "30", "31", "500"];
        let mut batch: Vec<_> = numbers
            .iter()
            .map(|n| establishment("20000000", n))
            .collect();
        matcher.apply(&mut batch);
        for (rec, n) in batch.iter().zip(numbers) {
            assert_eq!(rec.coord(), matcher.nearest("20000000", n.parse().unwrap()));
        }
    }

    #[test]
    fn test_ineligible_rows_pass_through() {
        let matcher = matcher();
        let mut batch = vec![
            establishment("20000000", "SN"),
            establishment("30000000", "10"),
            establishment("", "10"),
        ];
        let before = batch.clone();

        assert_eq!(matcher.apply(&mut batch), 0);
        assert_eq!(batch, before);
    }

    #[test]
    fn test_non_numeric_catalog_rows_are_excluded() {
        let catalog = CoordinateCatalog::from_records(
            "RJ",
            vec![row("22000000", "99999999999999999999999", -1.0)],
        );
        let matcher = ApproximateMatcher::new(&catalog);
        assert_eq!(matcher.group_count(), 0);
        assert!(matcher.nearest("22000000", 1).is_none());
    }

    #[test]
    fn test_equal_numeric_values_keep_first_row() {
        let catalog = CoordinateCatalog::from_records(
            "RJ",
            vec![row("23000000", "010", -1.0), row("23000000", "10", -2.0)],
        );
        let matcher = ApproximateMatcher::new(&catalog);
        assert_eq!(matcher.nearest("23000000", 10).unwrap().latitude, -1.0);
    }

    #[test]
    fn test_resolved_rows_are_never_reassigned() {
        let matcher = matcher();
        let mut batch = vec![normalize_record(RawEstablishment {
            postal_code: "20000000".to_string(),
            street_number: "18".to_string(),
            latitude: Some(-99.0),
            longitude: Some(-99.0),
            ..Default::default()
        })];
        assert_eq!(matcher.apply(&mut batch), 0);
        assert_eq!(batch[0].coord(), Coord::new(-99.0, -99.0));
    }
}
