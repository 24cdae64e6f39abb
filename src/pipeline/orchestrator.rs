use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};

use crate::app::geocode_use_case::{GeocodeSummary, GeocodeUseCase};
use crate::catalog::CoordinateCatalog;
use crate::config::{Config, EnrichSettings};
use crate::domain::{EstablishmentRecord, MunicipalityFilter};
use crate::error::{EnrichError, Result};
use crate::infra::nominatim::NominatimClient;
use crate::infra::rate_limiter::RateLimiter;
use crate::matching::{resolved_count, ApproximateMatcher, ExactMatcher, Matcher};
use crate::observability::metrics;

/// Coverage of one cascade run. Resolved counts are cumulative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub region: String,
    pub total: usize,
    /// Rows that already had coordinates on input.
    pub prior: usize,
    pub after_exact: usize,
    pub after_approximate: usize,
    /// `None` when the geocoder stage was disabled.
    pub after_geocoder: Option<usize>,
    pub geocoder: Option<GeocodeSummary>,
    pub finished_at: DateTime<Utc>,
}

impl CoverageReport {
    pub fn resolved(&self) -> usize {
        self.after_geocoder.unwrap_or(self.after_approximate)
    }

    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.resolved() as f64 / self.total as f64 * 100.0
        }
    }
}

fn check_row_count(stage: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(EnrichError::RowCountMismatch {
            stage,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Runs exact → approximate → (optional) geocoder over establishment batches.
#[derive(Clone)]
pub struct Enricher {
    settings: EnrichSettings,
    geocoder: Option<Arc<GeocodeUseCase>>,
}

impl Enricher {
    /// Catalog stages only.
    pub fn new(settings: EnrichSettings) -> Self {
        Self {
            settings,
            geocoder: None,
        }
    }

    /// Enables the geocoder stage with the given use case.
    pub fn with_geocoder(mut self, geocoder: GeocodeUseCase) -> Self {
        self.geocoder = Some(Arc::new(geocoder));
        self
    }

    /// Wires the Nominatim client and a fresh rate limiter when `enrich.use_geocoder` is set.
    pub fn from_config(config: &Config, stop: Option<Arc<AtomicBool>>) -> Result<Self> {
        config.validate()?;
        let enricher = Self::new(config.enrich.clone());
        if !config.enrich.use_geocoder {
            return Ok(enricher);
        }

        let client = NominatimClient::new(&config.geocoder)
            .map_err(|e| EnrichError::Config(format!("Could not build geocoder client: {}", e)))?;
        let limiter = RateLimiter::new(config.geocoder.min_interval());
        let mut geocoder =
            GeocodeUseCase::from_settings(Arc::new(client), Arc::new(limiter), &config.geocoder);
        if let Some(stop) = stop {
            geocoder = geocoder.with_stop_signal(stop);
        }
        Ok(enricher.with_geocoder(geocoder))
    }

    pub fn settings(&self) -> &EnrichSettings {
        &self.settings
    }

    pub fn geocoder_enabled(&self) -> bool {
        self.geocoder.is_some()
    }

    /// Loads `region`'s catalog and enriches the whole batch against it.
    pub async fn enrich(
        &self,
        region: &str,
        records: Vec<EstablishmentRecord>,
        municipalities: Option<&MunicipalityFilter>,
    ) -> Result<(Vec<EstablishmentRecord>, CoverageReport)> {
        let catalog = CoordinateCatalog::load(&self.settings.coords_dir, region, municipalities)?;
        self.enrich_with_catalog(&catalog, records).await
    }

    pub async fn enrich_with_catalog(
        &self,
        catalog: &CoordinateCatalog,
        mut records: Vec<EstablishmentRecord>,
    ) -> Result<(Vec<EstablishmentRecord>, CoverageReport)> {
        let total = records.len();
        info!(region = %catalog.region(), rows = total, "Enriching establishments");
        metrics::cascade::batch_processed(total);

        let prior = resolved_count(&records);

        let exact = ExactMatcher::new(catalog);
        let matched = exact.apply(&mut records);
        metrics::cascade::rows_resolved(exact.name(), matched);
        let after_exact = resolved_count(&records);

        let approximate = ApproximateMatcher::new(catalog);
        let matched = approximate.apply(&mut records);
        metrics::cascade::rows_resolved(approximate.name(), matched);
        let after_approximate = resolved_count(&records);

        let (after_geocoder, geocoder) = match &self.geocoder {
            Some(stage) => {
                let summary = stage.apply(&mut records).await;
                metrics::cascade::rows_resolved("geocoder", summary.resolved);
                (Some(resolved_count(&records)), Some(summary))
            }
            None => (None, None),
        };

        check_row_count("cascade", total, records.len())?;

        let report = CoverageReport {
            region: catalog.region().to_string(),
            total,
            prior,
            after_exact,
            after_approximate,
            after_geocoder,
            geocoder,
            finished_at: Utc::now(),
        };
        info!(
            region = %report.region,
            resolved = report.resolved(),
            total,
            "Enrichment result: {:.1}% with coordinates",
            report.percentage()
        );
        Ok((records, report))
    }

    /// Splits a batch by region code and enriches each part against its own catalog.
    ///
    /// Rows keep their input order. A region whose catalog is missing or
    /// unreadable passes through unchanged, as do rows with a blank region code.
    pub async fn enrich_by_region(
        &self,
        records: Vec<EstablishmentRecord>,
        municipalities: Option<&MunicipalityFilter>,
    ) -> Result<(Vec<EstablishmentRecord>, Vec<CoverageReport>)> {
        let total = records.len();
        let mut slots: Vec<Option<EstablishmentRecord>> = Vec::with_capacity(total);
        let mut by_region: BTreeMap<String, (Vec<usize>, Vec<EstablishmentRecord>)> =
            BTreeMap::new();

        for (position, record) in records.into_iter().enumerate() {
            if record.region_code.is_empty() {
                slots.push(Some(record));
                continue;
            }
            slots.push(None);
            let (positions, rows) = by_region.entry(record.region_code.clone()).or_default();
            positions.push(position);
            rows.push(record);
        }
        info!(rows = total, regions = by_region.len(), "Enriching by region");

        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_regions.max(1)));
        let filter = municipalities.cloned();
        let mut tasks = JoinSet::new();
        for (region, (positions, rows)) in by_region {
            let enricher = self.clone();
            let permits = permits.clone();
            let filter = filter.clone();
            let span = info_span!("region", region = %region);
            tasks.spawn(
                async move {
                    let _permit = permits.acquire_owned().await.ok();
                    let outcome = enricher.enrich_region(&region, rows, filter.as_ref()).await;
                    (positions, outcome)
                }
                .instrument(span),
            );
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (positions, outcome) = joined?;
            let (rows, report) = outcome?;
            check_row_count("region", positions.len(), rows.len())?;
            for (position, row) in positions.into_iter().zip(rows) {
                slots[position] = Some(row);
            }
            reports.extend(report);
        }
        reports.sort_by(|a, b| a.region.cmp(&b.region));

        let filled = slots.iter().filter(|s| s.is_some()).count();
        check_row_count("region merge", total, filled)?;
        let merged: Vec<EstablishmentRecord> = slots.into_iter().flatten().collect();

        let resolved = resolved_count(&merged);
        info!(
            resolved,
            total,
            regions = reports.len(),
            "Enrichment by region finished"
        );
        Ok((merged, reports))
    }

    async fn enrich_region(
        &self,
        region: &str,
        rows: Vec<EstablishmentRecord>,
        municipalities: Option<&MunicipalityFilter>,
    ) -> Result<(Vec<EstablishmentRecord>, Option<CoverageReport>)> {
        let catalog =
            match CoordinateCatalog::load(&self.settings.coords_dir, region, municipalities) {
                Ok(catalog) => catalog,
                Err(EnrichError::CatalogNotFound { region, path }) => {
                    warn!(
                        region = %region,
                        path = %path.display(),
                        rows = rows.len(),
                        "No coordinate catalog for region, skipping enrichment"
                    );
                    metrics::cascade::region_failed(&region);
                    return Ok((rows, None));
                }
                Err(e) => {
                    warn!(
                        region = %region,
                        rows = rows.len(),
                        error = %e,
                        "Coordinate catalog unusable, skipping enrichment"
                    );
                    metrics::cascade::region_failed(region);
                    return Ok((rows, None));
                }
            };
        let (rows, report) = self.enrich_with_catalog(&catalog, rows).await?;
        Ok((rows, Some(report)))
    }
}
