use place_search_client::{
    CacheConfig, DeduplicationConfig, GeocodeOptions, HttpPlacesProvider, JsonFileStore,
    NearbySearchOptions, PlaceCategory, PlacesClient,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let base_url =
        std::env::var("PLACES_API_URL").unwrap_or_else(|_| "https://maps.example.com/v1".into());
    let api_key = std::env::var("PLACES_API_KEY").unwrap_or_else(|_| "demo-key".into());

    let provider = Arc::new(HttpPlacesProvider::new(&base_url, api_key)?);
    let store = Arc::new(JsonFileStore::open("places-cache.json"));

    let client = PlacesClient::with_cache_and_store(
        provider,
        CacheConfig::default(),
        DeduplicationConfig::default(),
        store,
    )
    .await;
    client.start_sweeper();

    // First lookup goes to the provider and is cached.
    let geocode = GeocodeOptions::new("Av. Paulista, 900, Sao Paulo");
    let start = std::time::Instant::now();
    let located = client.geocode(&geocode).await?;
    println!("geocoded in {:?}: {:?}", start.elapsed(), located);

    // Second lookup is served from cache.
    let start = std::time::Instant::now();
    client.geocode(&geocode).await?;
    println!("cached geocode took {:?}", start.elapsed());

    let nearby = NearbySearchOptions::new(
        located.latitude,
        located.longitude,
        5.0,
        PlaceCategory::Veterinary,
    );
    let places = client.search_nearby(&nearby).await?;
    println!("found {} veterinary clinics nearby", places.len());

    if let Some(stats) = client.cache_stats().await {
        println!("cache stats: {:?}", stats);
    }

    let report = client.optimizer().build_report();
    println!("{}", report.summary);
    for recommendation in &report.recommendations {
        println!("  - {}", recommendation);
    }

    client.stop_sweeper();
    Ok(())
}
