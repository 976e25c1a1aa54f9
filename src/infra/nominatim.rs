use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{FluxError, Result};
use crate::fetch::{Fetched, HttpClient, fetch_bytes};
use crate::services::geocoder::{Coordinates, Geocoder, is_autonomous_city, osm_province_name};

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

/// [`Geocoder`] backed by the OpenStreetMap Nominatim search API.
pub struct NominatimClient<C> {
    client: C,
    base_url: String,
}

impl<C: HttpClient> NominatimClient<C> {
    pub fn new(client: C) -> Self {
        Self::with_base_url(client, NOMINATIM_URL)
    }

    pub fn with_base_url(client: C, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn search_url(&self, province: &str) -> Result<String> {
        let (key, value) = if is_autonomous_city(province) {
            ("city", province.to_string())
        } else {
            ("county", osm_province_name(province))
        };
        let url = reqwest::Url::parse_with_params(
            &format!("{}/search", self.base_url),
            &[(key, value.as_str()), ("country", "spain"), ("format", "json")],
        )
        .map_err(|e| FluxError::Http(e.to_string()))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl<C: HttpClient> Geocoder for NominatimClient<C> {
    async fn locate(&self, province: &str) -> Result<Coordinates> {
        let url = self.search_url(province)?;
        let body = match fetch_bytes(&self.client, &url).await? {
            Fetched::Found(body) => body,
            Fetched::NotFound => {
                return Err(FluxError::Http(format!("geocoder endpoint not found: {url}")));
            }
        };

        let places: Vec<Place> = serde_json::from_slice(&body)
            .map_err(|e| FluxError::Http(format!("failed to parse geocoder response: {e}")))?;
        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| FluxError::Http(format!("no coordinates found for '{province}'")))?;

        let parse = |v: &str| {
            v.parse::<f64>()
                .map_err(|e| FluxError::Http(format!("invalid coordinate '{v}' for '{province}': {e}")))
        };
        Ok(Coordinates {
            lat: parse(&place.lat)?,
            lon: parse(&place.lon)?,
        })
    }
}
