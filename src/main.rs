use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use geo_enricher::catalog::CoordinateCatalog;
use geo_enricher::config::{Config, DEFAULT_CONFIG_PATH};
use geo_enricher::domain::MunicipalityFilter;
use geo_enricher::normalize::normalize_batch;
use geo_enricher::observability::{init_logging, init_metrics};
use geo_enricher::pipeline::{CoverageReport, Enricher};
use geo_enricher::storage;

#[derive(Parser)]
#[command(name = "geo-enricher")]
#[command(about = "Attach coordinates to establishment records from postal code catalogs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich an establishment CSV batch with coordinates
    Enrich(EnrichArgs),
    /// Load a region catalog and print what it contains
    InspectCatalog {
        #[arg(long)]
        region: String,
        #[arg(long)]
        coords_dir: Option<PathBuf>,
        #[arg(long)]
        municipalities: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct EnrichArgs {
    /// Establishment batch to read
    #[arg(long)]
    input: PathBuf,
    /// Where to write the enriched batch
    #[arg(long)]
    output: PathBuf,
    /// Enrich the whole batch against this region's catalog instead of splitting by region_code
    #[arg(long)]
    region: Option<String>,
    /// Directory holding coord_<REGION>.csv files (overrides the config file)
    #[arg(long)]
    coords_dir: Option<PathBuf>,
    /// Municipality codes to keep from the catalog (comma-separated)
    #[arg(long)]
    municipalities: Option<String>,
    /// Run the external geocoder for rows the catalog could not place
    #[arg(long)]
    geocode: bool,
    /// Config file (defaults to ./config.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write coverage reports as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_PATH).is_file() => {
            Config::load(Path::new(DEFAULT_CONFIG_PATH))?
        }
        None => Config::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn parse_municipalities(list: Option<&str>) -> Result<Option<MunicipalityFilter>> {
    match list {
        None => Ok(None),
        Some(list) => MunicipalityFilter::parse(list)
            .map(Some)
            .with_context(|| format!("Invalid municipality list: {}", list)),
    }
}

fn print_report(report: &CoverageReport) {
    println!("\n📊 Coverage for {}:", report.region);
    println!("   Rows: {}", report.total);
    println!("   Already placed: {}", report.prior);
    println!("   After exact match: {}", report.after_exact);
    println!("   After approximate match: {}", report.after_approximate);
    if let Some(after) = report.after_geocoder {
        println!("   After geocoder: {}", after);
    }
    if let Some(summary) = &report.geocoder {
        println!(
            "   Geocoder requests: {} ({} failed, {} rejected)",
            summary.requests, summary.failures, summary.rejected
        );
        if summary.stopped_early {
            println!("   ⚠️  Geocoder stopped before finishing");
        }
    }
    println!(
        "   Resolved: {}/{} ({:.1}%)",
        report.resolved(),
        report.total,
        report.percentage()
    );
}

/// Stop flag for the geocoder stage, or `None` when nothing would read it.
///
/// The first Ctrl-C sets the flag; a second one exits right away.
fn stop_listener(config: &Config) -> Option<Arc<AtomicBool>> {
    if !config.enrich.use_geocoder {
        return None;
    }
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, finishing the current row (press Ctrl-C again to abort)");
        flag.store(true, Ordering::Relaxed);
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt received, aborting");
            std::process::exit(130);
        }
    });
    Some(stop)
}

async fn run_enrich(args: EnrichArgs) -> Result<()> {
    let EnrichArgs {
        input,
        output,
        region,
        coords_dir,
        municipalities,
        geocode,
        config,
        report,
    } = args;
    let mut config = load_config(config.as_deref())?;
    if let Some(dir) = coords_dir {
        config.enrich.coords_dir = dir;
    }
    if geocode {
        config.enrich.use_geocoder = true;
    }
    let filter = parse_municipalities(municipalities.as_deref())?;

    let stop = stop_listener(&config);
    let enricher = Enricher::from_config(&config, stop)?;

    let raw = storage::read_establishments(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let records = normalize_batch(raw);
    info!(
        rows = records.len(),
        geocoder = enricher.geocoder_enabled(),
        "Starting enrichment"
    );

    let (records, reports) = match region {
        Some(region) => {
            let (records, report) = enricher
                .enrich(&region, records, filter.as_ref())
                .await
                .with_context(|| format!("Enrichment failed for region {}", region))?;
            (records, vec![report])
        }
        None => enricher.enrich_by_region(records, filter.as_ref()).await?,
    };

    storage::write_establishments(&output, &records)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    for report in &reports {
        print_report(report);
    }
    if let Some(path) = report {
        storage::write_reports(&path, &reports)?;
        info!(path = %path.display(), "Coverage report written");
    }
    println!("\n✅ Wrote {} rows to {}", records.len(), output.display());
    Ok(())
}

fn run_inspect(
    region: String,
    coords_dir: Option<PathBuf>,
    municipalities: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config.as_deref())?;
    let dir = coords_dir.unwrap_or(config.enrich.coords_dir);
    let filter = parse_municipalities(municipalities.as_deref())?;

    let catalog = CoordinateCatalog::load(&dir, &region, filter.as_ref())?;
    println!("\n🗺️  Catalog {}:", catalog.region());
    println!("   Rows: {}", catalog.len());
    println!("   Numeric street numbers: {}", catalog.numeric_len());
    println!("   Postal codes: {}", catalog.postal_code_count());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();
    init_metrics();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enrich(args) => {
            println!("🔄 Enriching {}...", args.input.display());
            run_enrich(args).await
        }
        Commands::InspectCatalog {
            region,
            coords_dir,
            municipalities,
            config,
        } => run_inspect(region, coords_dir, municipalities, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_listener_only_with_geocoder() {
        let mut config = Config::default();
        assert!(stop_listener(&config).is_none());

        config.enrich.use_geocoder = true;
        let stop = stop_listener(&config).unwrap();
        assert!(!stop.load(Ordering::Relaxed));
    }
}
