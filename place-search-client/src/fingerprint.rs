use serde_json::{Map, Value};

/// Derives a short cache key from an operation prefix and its parameters.
///
/// Two parameter maps holding the same keys and values always produce the
/// same key, whatever order the properties were inserted in. Collisions are
/// tolerated by the cache (a collision only widens a lookup, it never breaks
/// correctness), so a 32-bit hash is enough.
pub fn fingerprint(prefix: &str, params: &Map<String, Value>) -> String {
    let mut canonical = String::new();
    write_canonical_object(params, &mut canonical);

    let mut hash: i32 = 0;
    for unit in canonical.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(unit as i32);
    }

    format!("{}_{}", prefix, to_base36(hash.unsigned_abs()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_canonical_object(map, out),
        // Scalars already serialize deterministically.
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_canonical_object(map: &Map<String, Value>, out: &mut String) {
    // Sort keys at every level so property order never reaches the hash.
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (index, key) in keys.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key], out);
    }
    out.push('}');
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut encoded = Vec::new();
    while value > 0 {
        encoded.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    encoded.reverse();
    String::from_utf8(encoded).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn identical_params_share_a_key() {
        let a = params(json!({ "lat": -23.5505, "lng": -46.6333, "radius": 5 }));
        let b = params(json!({ "radius": 5, "lng": -46.6333, "lat": -23.5505 }));

        assert_eq!(fingerprint("nearby_search", &a), fingerprint("nearby_search", &b));
    }

    #[test]
    fn nested_objects_are_canonicalized_recursively() {
        let a = params(json!({ "origin": { "lat": 1.0, "lng": 2.0 }, "mode": "walking" }));
        let b = params(json!({ "mode": "walking", "origin": { "lng": 2.0, "lat": 1.0 } }));

        assert_eq!(fingerprint("distance", &a), fingerprint("distance", &b));
    }

    #[test]
    fn different_params_get_different_keys() {
        let a = params(json!({ "address": "rua augusta 1500" }));
        let b = params(json!({ "address": "rua augusta 1501" }));

        assert_ne!(fingerprint("geocode", &a), fingerprint("geocode", &b));
    }

    #[test]
    fn array_order_is_significant() {
        let a = params(json!({ "categories": ["pet_shop", "veterinary"] }));
        let b = params(json!({ "categories": ["veterinary", "pet_shop"] }));

        assert_ne!(fingerprint("nearby_search", &a), fingerprint("nearby_search", &b));
    }

    #[test]
    fn empty_params_produce_a_key() {
        let key = fingerprint("geocode", &Map::new());
        assert!(key.starts_with("geocode_"));
        assert!(key.len() > "geocode_".len());
    }

    #[test]
    fn key_carries_the_prefix() {
        let key = fingerprint("place_details", &params(json!({ "id": "abc123" })));
        assert!(key.starts_with("place_details_"));
    }

    #[test]
    fn base36_round_trips_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u32::MAX), "1z141z3");
    }
}
