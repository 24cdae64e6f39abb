//! CSV batch files in, CSV batch files and JSON coverage reports out.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::domain::{EstablishmentRecord, Provenance, RawEstablishment};
use crate::error::Result;
use crate::pipeline::CoverageReport;

/// One output row. Unresolved rows leave the coordinate and stage columns empty.
#[derive(Debug, Serialize)]
pub struct OutputRecord<'a> {
    pub composite_id: &'a str,
    pub id_base: &'a str,
    pub id_order: &'a str,
    pub id_check_digit: &'a str,
    pub display_name: &'a str,
    pub street_type: &'a str,
    pub street_name: &'a str,
    pub street_number: &'a str,
    pub neighborhood: &'a str,
    pub postal_code: &'a str,
    pub region_code: &'a str,
    pub municipality_code: &'a str,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub match_stage: Option<Provenance>,
}

impl<'a> From<&'a EstablishmentRecord> for OutputRecord<'a> {
    fn from(r: &'a EstablishmentRecord) -> Self {
        let coord = r.coord();
        OutputRecord {
            composite_id: &r.composite_id,
            id_base: &r.id_base,
            id_order: &r.id_order,
            id_check_digit: &r.id_check_digit,
            display_name: &r.display_name,
            street_type: &r.street_type,
            street_name: &r.street_name,
            street_number: &r.street_number,
            neighborhood: &r.neighborhood,
            postal_code: &r.postal_code,
            region_code: &r.region_code,
            municipality_code: &r.municipality_code,
            latitude: coord.map(|c| c.latitude),
            longitude: coord.map(|c| c.longitude),
            match_stage: r.provenance(),
        }
    }
}

pub fn read_establishments(path: &Path) -> Result<Vec<RawEstablishment>> {
    let file = File::open(path)?;
    let rows = read_establishments_from(file)?;
    info!(path = %path.display(), rows = rows.len(), "Read establishment batch");
    Ok(rows)
}

/// Columns are matched by header name; unknown columns are ignored and missing ones default to empty.
pub fn read_establishments_from<R: Read>(reader: R) -> Result<Vec<RawEstablishment>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let mut rows = Vec::new();
    for row in csv_reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn write_establishments(path: &Path, records: &[EstablishmentRecord]) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path)?;
    write_establishments_to(file, records)?;
    info!(path = %path.display(), rows = records.len(), "Wrote enriched batch");
    Ok(())
}

pub fn write_establishments_to<W: Write>(writer: W, records: &[EstablishmentRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(OutputRecord::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes coverage reports as pretty-printed JSON.
pub fn write_reports(path: &Path, reports: &[CoverageReport]) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(reports)?;
    fs::write(path, json)?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
