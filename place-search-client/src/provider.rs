use async_trait::async_trait;
use serde::de::DeserializeOwned;
use surf::Client;
use utils::{ApiEndpoint, QueryParams, SurfLogging};

use crate::error::Error;
use crate::models::{DistanceResult, GeocodeResult, Place, PlaceDetails};
use crate::search_options::{
    DistanceOptions, GeocodeOptions, NearbySearchOptions, PlaceDetailsOptions,
};

/// The external mapping provider, behind a trait so the caching stack stays
/// agnostic to how results are produced.
#[async_trait]
pub trait PlacesProvider: Send + Sync {
    async fn geocode(&self, options: &GeocodeOptions) -> Result<GeocodeResult, Error>;
    async fn search_nearby(&self, options: &NearbySearchOptions) -> Result<Vec<Place>, Error>;
    async fn place_details(&self, options: &PlaceDetailsOptions) -> Result<PlaceDetails, Error>;
    async fn distance(&self, options: &DistanceOptions) -> Result<DistanceResult, Error>;
}

/// HTTP implementation of [`PlacesProvider`].
pub struct HttpPlacesProvider {
    http: Client,
    endpoint: ApiEndpoint,
    api_key: String,
}

impl HttpPlacesProvider {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, Error> {
        let endpoint = ApiEndpoint::parse(base_url)
            .map_err(|e| Error::request(format!("invalid base url {}: {}", base_url, e)))?;

        Ok(Self {
            http: Client::new().with(SurfLogging),
            endpoint,
            api_key: api_key.into(),
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str, query: QueryParams) -> Result<T, Error> {
        let query = query.add("key", &self.api_key);
        let url = self
            .endpoint
            .join_with_query(path, &query)
            .map_err(|e| Error::request(e.to_string()))?;

        let mut response = self
            .http
            .get(url)
            .await
            .map_err(|e| Error::request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::status(response.status()));
        }

        response
            .body_json::<T>()
            .await
            .map_err(|e| Error::decode(e.to_string()))
    }
}

#[async_trait]
impl PlacesProvider for HttpPlacesProvider {
    async fn geocode(&self, options: &GeocodeOptions) -> Result<GeocodeResult, Error> {
        let query = QueryParams::new().add("address", options.normalized_address());
        self.fetch("geocode", query).await
    }

    async fn search_nearby(&self, options: &NearbySearchOptions) -> Result<Vec<Place>, Error> {
        let query = QueryParams::new()
            .add("lat", options.latitude())
            .add("lng", options.longitude())
            .add("radius_km", options.radius_km())
            .add("category", options.category());
        self.fetch("places/nearby", query).await
    }

    async fn place_details(&self, options: &PlaceDetailsOptions) -> Result<PlaceDetails, Error> {
        let path = format!("places/{}", urlencoding::encode(options.place_id()));
        self.fetch(&path, QueryParams::new()).await
    }

    async fn distance(&self, options: &DistanceOptions) -> Result<DistanceResult, Error> {
        let query = QueryParams::new()
            .add("origin_lat", options.origin_latitude())
            .add("origin_lng", options.origin_longitude())
            .add("dest_lat", options.destination_latitude())
            .add("dest_lng", options.destination_longitude());
        self.fetch("distance", query).await
    }
}
