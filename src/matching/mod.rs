//! Catalog-backed matching stages. Both are pure, synchronous passes over a
//! batch; they only ever fill rows that are still unresolved.

pub mod approximate;
pub mod exact;

pub use approximate::ApproximateMatcher;
pub use exact::ExactMatcher;

use crate::domain::EstablishmentRecord;

/// A stage that resolves rows in place.
///
/// Working on a slice keeps the batch's length and row order fixed.
pub trait Matcher {
    fn name(&self) -> &'static str;

    /// Returns how many rows this call newly resolved.
    fn apply(&self, records: &mut [EstablishmentRecord]) -> usize;
}

pub(crate) fn resolved_count(records: &[EstablishmentRecord]) -> usize {
    records.iter().filter(|r| r.is_resolved()).count()
}
