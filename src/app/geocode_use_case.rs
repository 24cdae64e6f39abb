use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::ports::{GeocoderPort, RateLimiterPort};
use crate::config::GeocoderSettings;
use crate::domain::{Coord, EstablishmentRecord, Provenance};
use crate::observability::metrics;

/// What one geocoder pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GeocodeSummary {
    /// Unresolved rows that were tried.
    pub rows_attempted: usize,
    pub requests: usize,
    pub resolved: usize,
    /// Requests that errored (network, status, undecodable body).
    pub failures: usize,
    /// Results dropped by the hemisphere check.
    pub rejected: usize,
    pub stopped_early: bool,
}

/// Address query: street type, name, number, neighborhood and region, then the
/// country suffix. `None` when every address part is blank.
pub fn address_query(record: &EstablishmentRecord, country_suffix: &str) -> Option<String> {
    let parts: Vec<&str> = [
        record.street_type.as_str(),
        record.street_name.as_str(),
        record.street_number.as_str(),
        record.neighborhood.as_str(),
        record.region_code.as_str(),
    ]
    .into_iter()
    .map(str::trim)
    .filter(|p| !p.is_empty())
    .collect();
    if parts.is_empty() {
        return None;
    }
    let mut query = parts.join(" ");
    let suffix = country_suffix.trim();
    if !suffix.is_empty() {
        query.push(' ');
        query.push_str(suffix);
    }
    Some(query)
}

/// Display name followed by region code. `None` when the name is blank.
pub fn name_query(record: &EstablishmentRecord) -> Option<String> {
    let name = record.display_name.trim();
    if name.is_empty() {
        return None;
    }
    let region = record.region_code.trim();
    if region.is_empty() {
        Some(name.to_string())
    } else {
        Some(format!("{} {}", name, region))
    }
}

/// Queries in the order they are tried.
pub fn query_variants(record: &EstablishmentRecord, country_suffix: &str) -> Vec<String> {
    address_query(record, country_suffix)
        .into_iter()
        .chain(name_query(record))
        .collect()
}

/// Last stage of the cascade: asks the external service about rows the catalog could not place.
pub struct GeocodeUseCase {
    geocoder: Arc<dyn GeocoderPort>,
    limiter: Arc<dyn RateLimiterPort>,
    country_suffix: String,
    progress_every: usize,
    stop: Option<Arc<AtomicBool>>,
}

impl GeocodeUseCase {
    /// Uses the default geocoder settings.
    pub fn new(geocoder: Arc<dyn GeocoderPort>, limiter: Arc<dyn RateLimiterPort>) -> Self {
        Self::from_settings(geocoder, limiter, &GeocoderSettings::default())
    }

    pub fn from_settings(
        geocoder: Arc<dyn GeocoderPort>,
        limiter: Arc<dyn RateLimiterPort>,
        settings: &GeocoderSettings,
    ) -> Self {
        Self {
            geocoder,
            limiter,
            country_suffix: settings.country_suffix.clone(),
            progress_every: settings.progress_every.max(1),
            stop: None,
        }
    }

    pub fn with_country_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.country_suffix = suffix.into();
        self
    }

    pub fn with_progress_every(mut self, rows: usize) -> Self {
        self.progress_every = rows.max(1);
        self
    }

    /// Once the flag is set no further rows are started.
    pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .map(|s| s.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    pub async fn apply(&self, records: &mut [EstablishmentRecord]) -> GeocodeSummary {
        let pending: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_resolved())
            .map(|(i, _)| i)
            .collect();
        let mut summary = GeocodeSummary::default();
        if pending.is_empty() {
            return summary;
        }

        let total = pending.len();
        info!(rows = total, "Geocoding unresolved establishments");

        for row in pending {
            if self.stop_requested() {
                warn!(
                    processed = summary.rows_attempted,
                    total, "Stop requested, no further rows will be geocoded"
                );
                summary.stopped_early = true;
                break;
            }

            let queries = query_variants(&records[row], &self.country_suffix);
            let candidate = self.first_accepted(&queries, &mut summary).await;
            if records[row].resolve(Provenance::Geocoder, candidate) {
                summary.resolved += 1;
            }
            summary.rows_attempted += 1;

            if summary.rows_attempted % self.progress_every == 0 {
                info!(
                    processed = summary.rows_attempted,
                    total,
                    resolved = summary.resolved,
                    "Geocoder progress"
                );
            }
        }

        info!(
            processed = summary.rows_attempted,
            resolved = summary.resolved,
            requests = summary.requests,
            failures = summary.failures,
            rejected = summary.rejected,
            "Geocoder finished"
        );
        summary
    }

    async fn first_accepted(
        &self,
        queries: &[String],
        summary: &mut GeocodeSummary,
    ) -> Option<Coord> {
        for query in queries {
            self.limiter.acquire().await;
            summary.requests += 1;

            let started = Instant::now();
            let outcome = self.geocoder.search(query).await;
            metrics::geocoder::request_duration(started.elapsed());

            match outcome {
                Ok(Some(coord)) if coord.in_service_area() => {
                    metrics::geocoder::request("accepted");
                    return Some(coord);
                }
                Ok(Some(coord)) => {
                    summary.rejected += 1;
                    metrics::geocoder::request("rejected");
                    debug!(
                        query = %query,
                        lat = coord.latitude,
                        lon = coord.longitude,
                        "Geocoder result outside service area"
                    );
                }
                Ok(None) => {
                    metrics::geocoder::request("empty");
                    debug!(query = %query, "Geocoder returned no result");
                }
                Err(e) => {
                    summary.failures += 1;
                    metrics::geocoder::request("error");
                    warn!(query = %query, error = %e, "Geocoding request failed");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawEstablishment;
    use crate::error::GeocodeError;
    use crate::normalize::normalize_record;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedGeocoder {
        answers: HashMap<String, Option<(f64, f64)>>,
        failing: Vec<String>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedGeocoder {
        fn answer(mut self, query: &str, lat: f64, lon: f64) -> Self {
            self.answers.insert(query.to_string(), Some((lat, lon)));
            self
        }

        fn fail(mut self, query: &str) -> Self {
            self.failing.push(query.to_string());
            self
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GeocoderPort for ScriptedGeocoder {
        async fn search(&self, query: &str) -> Result<Option<Coord>, GeocodeError> {
            self.seen.lock().unwrap().push(query.to_string());
            if self.failing.iter().any(|q| q == query) {
                return Err(GeocodeError::Status(503));
            }
            Ok(self
                .answers
                .get(query)
                .copied()
                .flatten()
                .and_then(|(lat, lon)| Coord::new(lat, lon)))
        }
    }

    struct CountingLimiter(Mutex<usize>);

    #[async_trait]
    impl RateLimiterPort for CountingLimiter {
        async fn acquire(&self) {
            *self.0.lock().unwrap() += 1;
        }
    }

    fn establishment(name: &str) -> EstablishmentRecord {
        normalize_record(RawEstablishment {
            display_name: name.to_string(),
            street_type: "RUA".to_string(),
            street_name: "DOM AQUINO".to_string(),
            street_number: "1354".to_string(),
            neighborhood: "CENTRO".to_string(),
            region_code: "MS".to_string(),
            postal_code: "79002182".to_string(),
            ..Default::default()
        })
    }

    const ADDRESS: &str = "RUA DOM AQUINO 1354 CENTRO MS Brasil";

    #[test]
    fn test_query_variants() {
        let rec = establishment("Padaria Central");
        assert_eq!(
            query_variants(&rec, "Brasil"),
            vec![ADDRESS.to_string(), "Padaria Central MS".to_string()]
        );

        let blank = normalize_record(RawEstablishment::default());
        assert!(query_variants(&blank, "Brasil").is_empty());

        let mut no_name = establishment("  ");
        no_name.street_type.clear();
        assert_eq!(
            query_variants(&no_name, ""),
            vec!["DOM AQUINO 1354 CENTRO MS".to_string()]
        );
    }

    #[test]
    fn test_settings_drive_query_suffix_and_progress() {
        let limiter = Arc::new(CountingLimiter(Mutex::new(0)));
        let defaults = GeocoderSettings::default();
        let stage = GeocodeUseCase::new(Arc::new(ScriptedGeocoder::default()), limiter.clone());
        assert_eq!(stage.country_suffix, defaults.country_suffix);
        assert_eq!(stage.progress_every, defaults.progress_every);

        let settings = GeocoderSettings {
            country_suffix: "Brazil".to_string(),
            progress_every: 0,
            ..Default::default()
        };
        let stage =
            GeocodeUseCase::from_settings(Arc::new(ScriptedGeocoder::default()), limiter, &settings);
        assert_eq!(stage.country_suffix, "Brazil");
        assert_eq!(stage.progress_every, 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_name_query() {
        let geocoder = Arc::new(ScriptedGeocoder::default().answer("Padaria Central MS", -20.4, -54.6));
        let limiter = Arc::new(CountingLimiter(Mutex::new(0)));
        let stage = GeocodeUseCase::new(geocoder.clone(), limiter.clone());
        let mut batch = vec![establishment("Padaria Central")];

        let summary = stage.apply(&mut batch).await;

        assert_eq!(geocoder.seen(), vec![ADDRESS.to_string(), "Padaria Central MS".to_string()]);
        assert_eq!(batch[0].coord(), Coord::new(-20.4, -54.6));
        assert_eq!(batch[0].provenance(), Some(Provenance::Geocoder));
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.requests, 2);
        assert_eq!(*limiter.0.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_accepted_address_skips_name_query() {
        let geocoder = Arc::new(ScriptedGeocoder::default().answer(ADDRESS, -20.46, -54.61));
        let stage = GeocodeUseCase::new(geocoder.clone(), Arc::new(CountingLimiter(Mutex::new(0))));
        let mut batch = vec![establishment("Padaria Central")];

        stage.apply(&mut batch).await;

        assert_eq!(geocoder.seen(), vec![ADDRESS.to_string()]);
        assert_eq!(batch[0].coord(), Coord::new(-20.46, -54.61));
    }

    #[tokio::test]
    async fn test_hemisphere_check_and_errors_are_not_fatal() {
        let geocoder = Arc::new(
            ScriptedGeocoder::default()
                .answer(ADDRESS, 20.46, -54.61)
                .fail("Padaria Central MS"),
        );
        let stage = GeocodeUseCase::new(geocoder, Arc::new(CountingLimiter(Mutex::new(0))));
        let mut batch = vec![establishment("Padaria Central")];

        let summary = stage.apply(&mut batch).await;

        assert!(!batch[0].is_resolved());
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.resolved, 0);
        assert_eq!(summary.rows_attempted, 1);
    }

    #[tokio::test]
    async fn test_resolved_rows_are_not_queried() {
        let geocoder = Arc::new(ScriptedGeocoder::default());
        let stage = GeocodeUseCase::new(geocoder.clone(), Arc::new(CountingLimiter(Mutex::new(0))));
        let mut placed = establishment("Placed");
        placed.resolve(Provenance::Exact, Coord::new(-1.0, -1.0));
        let mut batch = vec![placed];

        let summary = stage.apply(&mut batch).await;

        assert!(geocoder.seen().is_empty());
        assert_eq!(summary, GeocodeSummary::default());
        assert_eq!(batch[0].provenance(), Some(Provenance::Exact));
    }

    #[tokio::test]
    async fn test_stop_signal_keeps_finished_rows() {
        let stop = Arc::new(AtomicBool::new(true));
        let geocoder = Arc::new(ScriptedGeocoder::default());
        let stage = GeocodeUseCase::new(geocoder.clone(), Arc::new(CountingLimiter(Mutex::new(0))))
            .with_stop_signal(stop);
        let mut batch = vec![establishment("A"), establishment("B")];

        let summary = stage.apply(&mut batch).await;

        assert!(summary.stopped_early);
        assert_eq!(summary.rows_attempted, 0);
        assert!(geocoder.seen().is_empty());
        assert_eq!(batch.len(), 2);
    }
}
