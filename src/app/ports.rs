use async_trait::async_trait;

use crate::domain::Coord;
use crate::error::GeocodeError;

/// Free-text geocoding service.
#[async_trait]
pub trait GeocoderPort: Send + Sync {
    /// Coordinates of the first candidate for `query`, `Ok(None)` when the service found nothing.
    async fn search(&self, query: &str) -> Result<Option<Coord>, GeocodeError>;
}

/// Gate shared by everything that talks to the geocoding service.
#[async_trait]
pub trait RateLimiterPort: Send + Sync {
    /// Resolves once the caller may issue its next request.
    async fn acquire(&self);
}
