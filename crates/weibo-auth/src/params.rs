//! Ordered request parameter merging

/// Owned, ordered key/value pairs for query strings and form bodies.
pub type Params = Vec<(String, String)>;

/// Merge `overrides` into `base`.
///
/// Keys present in both keep their position from `base` but take the value
/// from `overrides`; new keys are appended in order. Duplicate keys within
/// `base` are left alone unless overridden.
pub fn merge(base: &[(&str, &str)], overrides: &[(&str, &str)]) -> Params {
    let mut merged: Params = base
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (key, value) in overrides {
        let mut replaced = false;
        for (existing_key, existing_value) in merged.iter_mut() {
            if existing_key.as_str() == *key {
                *existing_value = value.to_string();
                replaced = true;
            }
        }
        if !replaced {
            merged.push((key.to_string(), value.to_string()));
        }
    }
    merged
}
