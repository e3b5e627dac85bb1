use getset::Getters;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum_macros::{Display, EnumString};

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Place categories a tutor searches for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[cfg_attr(feature = "graphql", derive(async_graphql::Enum))]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlaceCategory {
    PetShop,
    Veterinary,
    Grooming,
    PetFriendlyPark,
}

/// Options for address geocoding.
#[derive(Clone, Debug, Getters)]
#[get = "pub"]
pub struct GeocodeOptions {
    address: String,
}

impl GeocodeOptions {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Address with surrounding/duplicate whitespace collapsed and case
    /// folded, so formatting noise does not split cache keys.
    pub fn normalized_address(&self) -> String {
        WHITESPACE
            .replace_all(self.address.trim(), " ")
            .to_lowercase()
    }

    pub fn cache_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("address".to_string(), json!(self.normalized_address()));
        params
    }
}

/// Options for a radius search around a coordinate.
#[derive(Clone, Copy, Debug, Getters)]
#[get = "pub"]
pub struct NearbySearchOptions {
    latitude: f64,
    longitude: f64,
    radius_km: f64,
    category: PlaceCategory,
}

impl NearbySearchOptions {
    pub fn new(latitude: f64, longitude: f64, radius_km: f64, category: PlaceCategory) -> Self {
        Self {
            latitude,
            longitude,
            radius_km,
            category,
        }
    }

    pub fn cache_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        // 4 decimal places is ~11 m; closer coordinates share a key.
        params.insert("lat".to_string(), json!(round4(self.latitude)));
        params.insert("lng".to_string(), json!(round4(self.longitude)));
        params.insert("radius_km".to_string(), json!(self.radius_km));
        params.insert("category".to_string(), json!(self.category.to_string()));
        params
    }
}

/// Options for fetching one place's details.
#[derive(Clone, Debug, Getters)]
#[get = "pub"]
pub struct PlaceDetailsOptions {
    place_id: String,
}

impl PlaceDetailsOptions {
    pub fn new(place_id: impl Into<String>) -> Self {
        Self {
            place_id: place_id.into(),
        }
    }

    pub fn cache_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("place_id".to_string(), json!(self.place_id));
        params
    }
}

/// Options for a distance computation between two coordinates.
#[derive(Clone, Copy, Debug, Getters)]
#[get = "pub"]
pub struct DistanceOptions {
    origin_latitude: f64,
    origin_longitude: f64,
    destination_latitude: f64,
    destination_longitude: f64,
}

impl DistanceOptions {
    pub fn new(
        origin_latitude: f64,
        origin_longitude: f64,
        destination_latitude: f64,
        destination_longitude: f64,
    ) -> Self {
        Self {
            origin_latitude,
            origin_longitude,
            destination_latitude,
            destination_longitude,
        }
    }

    pub fn cache_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert(
            "origin".to_string(),
            json!({
                "lat": round4(self.origin_latitude),
                "lng": round4(self.origin_longitude),
            }),
        );
        params.insert(
            "destination".to_string(),
            json!({
                "lat": round4(self.destination_latitude),
                "lng": round4(self.destination_longitude),
            }),
        );
        params
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    #[test]
    fn address_noise_shares_a_cache_key() {
        let a = GeocodeOptions::new("  Rua   Augusta, 1500 ");
        let b = GeocodeOptions::new("rua augusta, 1500");

        assert_eq!(a.normalized_address(), "rua augusta, 1500");
        assert_eq!(
            fingerprint("geocode", &a.cache_params()),
            fingerprint("geocode", &b.cache_params())
        );
    }

    #[test]
    fn coordinate_jitter_shares_a_cache_key() {
        let a = NearbySearchOptions::new(-23.55052, -46.63331, 5.0, PlaceCategory::PetShop);
        let b = NearbySearchOptions::new(-23.55048, -46.63329, 5.0, PlaceCategory::PetShop);

        assert_eq!(
            fingerprint("nearby_search", &a.cache_params()),
            fingerprint("nearby_search", &b.cache_params())
        );
    }

    #[test]
    fn category_splits_cache_keys() {
        let a = NearbySearchOptions::new(-23.5505, -46.6333, 5.0, PlaceCategory::PetShop);
        let b = NearbySearchOptions::new(-23.5505, -46.6333, 5.0, PlaceCategory::Veterinary);

        assert_ne!(
            fingerprint("nearby_search", &a.cache_params()),
            fingerprint("nearby_search", &b.cache_params())
        );
    }

    #[test]
    fn category_string_forms_round_trip() {
        assert_eq!(PlaceCategory::PetShop.to_string(), "pet_shop");
        assert_eq!(
            "veterinary".parse::<PlaceCategory>().unwrap(),
            PlaceCategory::Veterinary
        );
    }

    #[test]
    fn distance_params_nest_both_endpoints() {
        let options = DistanceOptions::new(-23.5505, -46.6333, -23.5614, -46.6559);
        let params = options.cache_params();

        assert!(params.contains_key("origin"));
        assert!(params.contains_key("destination"));
        assert_eq!(params["origin"]["lat"], json!(-23.5505));
    }
}
