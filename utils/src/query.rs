use multimap::MultiMap;
use url::form_urlencoded::Serializer;

/// Builder for URL query strings. Keys may repeat.
#[derive(Debug, Default, Clone)]
pub struct QueryParams {
    params: MultiMap<String, String>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Adds the pair only when a value is present.
    pub fn add_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.add(key, value),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Percent-encoded `key=value&...` form, without the leading `?`.
    pub fn to_query_string(&self) -> String {
        let mut serializer = Serializer::new(String::new());
        let mut pairs: Vec<(&String, &String)> = self.params.flat_iter().collect();
        // Stable output keeps request logs and tests readable.
        pairs.sort();
        for (key, value) in pairs {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sorted_query_string() {
        let query = QueryParams::new()
            .add("radius", 2.5)
            .add("category", "pet_shop")
            .add("lat", "-23.5505");

        assert_eq!(
            query.to_query_string(),
            "category=pet_shop&lat=-23.5505&radius=2.5"
        );
    }

    #[test]
    fn encodes_reserved_characters() {
        let query = QueryParams::new().add("address", "Rua Augusta, 1500 & anexo");
        assert_eq!(
            query.to_query_string(),
            "address=Rua+Augusta%2C+1500+%26+anexo"
        );
    }

    #[test]
    fn skips_absent_optional_values() {
        let query = QueryParams::new()
            .add("q", "vet")
            .add_opt("rating", None::<u32>);
        assert_eq!(query.to_query_string(), "q=vet");
    }
}
