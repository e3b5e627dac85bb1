pub mod endpoint;
pub mod query;
pub mod surf_logging;

pub use endpoint::ApiEndpoint;
pub use query::QueryParams;
pub use surf_logging::SurfLogging;
