//! Trait and types for resolving province names to coordinates.

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Abstraction over a geocoding provider (e.g., Nominatim).
#[async_trait::async_trait]
pub trait Geocoder: Send + Sync {
    /// Returns the coordinates of the province called `province`.
    async fn locate(&self, province: &str) -> Result<Coordinates>;
}

/// Rewrites an INE province name into the form OpenStreetMap knows.
///
/// - bilingual names keep the part before `/` (`Alicante/Alacant` → `Alicante`)
/// - `Coruña, A` becomes `A Coruna`
/// - other article suffixes move to the front (`Palmas, Las` → `Las Palmas`)
pub fn osm_province_name(province: &str) -> String {
    if let Some((first, _)) = province.split_once('/') {
        return first.to_string();
    }
    if province == "Coruña, A" {
        return "A Coruna".to_string();
    }
    if let Some((name, article)) = province.split_once(", ") {
        return format!("{article} {name}");
    }
    province.to_string()
}

/// Ceuta and Melilla are autonomous cities, not counties.
pub fn is_autonomous_city(province: &str) -> bool {
    matches!(province, "Ceuta" | "Melilla")
}
