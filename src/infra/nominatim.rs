use async_trait::async_trait;
use serde::Deserialize;

use crate::app::ports::GeocoderPort;
use crate::config::GeocoderSettings;
use crate::domain::Coord;
use crate::error::GeocodeError;

/// `GeocoderPort` backed by a Nominatim-compatible `/search` endpoint.
pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
    country_codes: String,
}

impl NominatimClient {
    pub fn new(settings: &GeocoderSettings) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            country_codes: settings.country_codes.clone(),
        })
    }
}

#[async_trait]
impl GeocoderPort for NominatimClient {
    async fn search(&self, query: &str) -> Result<Option<Coord>, GeocodeError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", self.country_codes.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        parse_first_result(&body)
    }
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: Degrees,
    lon: Degrees,
}

// Nominatim sends strings; other compatible services send numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Degrees {
    Number(f64),
    Text(String),
}

impl Degrees {
    fn value(&self) -> Result<f64, GeocodeError> {
        match self {
            Degrees::Number(v) => Ok(*v),
            Degrees::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| GeocodeError::InvalidCoordinate(s.clone())),
        }
    }
}

/// Reads the first candidate of a search response. Later candidates are ignored.
pub fn parse_first_result(body: &str) -> Result<Option<Coord>, GeocodeError> {
    let places: Vec<Place> =
        serde_json::from_str(body).map_err(|e| GeocodeError::Decode(e.to_string()))?;
    let Some(first) = places.first() else {
        return Ok(None);
    };
    let (lat, lon) = (first.lat.value()?, first.lon.value()?);
    Coord::new(lat, lon)
        .map(Some)
        .ok_or_else(|| GeocodeError::InvalidCoordinate(format!("{lat},{lon}")))
}
