use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnrichError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

pub const ENV_GEOCODER_URL: &str = "GEO_ENRICH_GEOCODER_URL";
pub const ENV_USER_AGENT: &str = "GEO_ENRICH_USER_AGENT";
pub const ENV_MIN_INTERVAL_MS: &str = "GEO_ENRICH_MIN_INTERVAL_MS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enrich: EnrichSettings,
    pub geocoder: GeocoderSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichSettings {
    /// Directory holding the `coord_<REGION>.csv` catalogs.
    pub coords_dir: PathBuf,
    /// Run the external geocoder after the catalog stages.
    pub use_geocoder: bool,
    /// Regions enriched at the same time by `enrich_by_region`.
    pub max_parallel_regions: usize,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        Self {
            coords_dir: PathBuf::from("data/coords"),
            use_geocoder: false,
            max_parallel_regions: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderSettings {
    pub base_url: String,
    pub user_agent: String,
    /// Minimum time between two consecutive requests.
    pub min_interval_ms: u64,
    pub timeout_seconds: u64,
    pub country_codes: String,
    /// Appended to every address query.
    pub country_suffix: String,
    /// Log a progress line every this many rows.
    pub progress_every: usize,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org/search".to_string(),
            user_agent: "geo-enricher/0.1".to_string(),
            min_interval_ms: 1100,
            timeout_seconds: 10,
            country_codes: "br".to_string(),
            country_suffix: "Brasil".to_string(),
            progress_every: 500,
        }
    }
}

impl GeocoderSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EnrichError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `GEO_ENRICH_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_GEOCODER_URL) {
            self.geocoder.base_url = url;
        }
        if let Some(agent) = lookup(ENV_USER_AGENT) {
            self.geocoder.user_agent = agent;
        }
        if let Some(ms) = lookup(ENV_MIN_INTERVAL_MS) {
            self.geocoder.min_interval_ms = ms.trim().parse().map_err(|_| {
                EnrichError::Config(format!("{} must be a whole number, got '{}'", ENV_MIN_INTERVAL_MS, ms))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.enrich.max_parallel_regions == 0 {
            return Err(EnrichError::Config(
                "enrich.max_parallel_regions must be at least 1".to_string(),
            ));
        }
        if self.geocoder.progress_every == 0 {
            return Err(EnrichError::Config(
                "geocoder.progress_every must be at least 1".to_string(),
            ));
        }
        if self.geocoder.base_url.trim().is_empty() {
            return Err(EnrichError::Config("geocoder.base_url is empty".to_string()));
        }
        Ok(())
    }
}
