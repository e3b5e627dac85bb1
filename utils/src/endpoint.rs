use getset::Getters;
use url::{ParseError, Url};

use crate::query::QueryParams;

/// A parsed service base URL that joins paths and query strings.
#[derive(Debug, Clone, Getters)]
#[get = "pub"]
pub struct ApiEndpoint {
    base: Url,
}

impl ApiEndpoint {
    pub fn parse(base: &str) -> Result<Self, ParseError> {
        // A missing trailing slash makes Url::join replace the last path
        // segment instead of appending.
        let normalized = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        Ok(Self {
            base: Url::parse(&normalized)?,
        })
    }

    pub fn join(&self, path: &str) -> Result<Url, ParseError> {
        self.base.join(path.trim_start_matches('/'))
    }

    pub fn join_with_query(&self, path: &str, query: &QueryParams) -> Result<Url, ParseError> {
        let mut url = self.join(path)?;
        if !query.is_empty() {
            url.set_query(Some(&query.to_query_string()));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_against_base() {
        let endpoint = ApiEndpoint::parse("https://maps.example.com/v1").unwrap();
        let url = endpoint.join("geocode").unwrap();
        assert_eq!(url.as_str(), "https://maps.example.com/v1/geocode");
    }

    #[test]
    fn appends_query_string() {
        let endpoint = ApiEndpoint::parse("https://maps.example.com/v1/").unwrap();
        let query = QueryParams::new().add("address", "av paulista");
        let url = endpoint.join_with_query("geocode", &query).unwrap();
        assert_eq!(
            url.as_str(),
            "https://maps.example.com/v1/geocode?address=av+paulista"
        );
    }
}
