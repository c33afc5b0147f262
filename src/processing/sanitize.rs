//! Helpers for normalizing document metadata before storage.

use std::collections::BTreeMap;

use super::types::DocumentMetadata;

/// Sanitize arbitrary string input by trimming whitespace and dropping empties.
pub(crate) fn sanitize_string(value: Option<String>) -> Option<String> {
    value.and_then(|input| {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Normalize brand names to their canonical casing.
///
/// The fleet's known reefer brands get a fixed spelling so filters match
/// regardless of how the caller cased them; unknown brands pass through
/// trimmed.
pub fn canonical_brand(value: Option<String>) -> Option<String> {
    sanitize_string(value).map(|brand| match brand.to_lowercase().as_str() {
        "thermoking" | "thermo king" => "ThermoKing".to_string(),
        "carrier" => "Carrier".to_string(),
        "daikin" => "Daikin".to_string(),
        "starcool" | "star cool" => "Starcool".to_string(),
        _ => brand,
    })
}

/// Normalize model identifiers: trimmed, uppercased.
pub fn canonical_model(value: Option<String>) -> Option<String> {
    sanitize_string(value).map(|model| model.to_uppercase())
}

/// Flatten sanitized document metadata into the map stored on every chunk.
pub(crate) fn to_metadata_map(metadata: DocumentMetadata) -> BTreeMap<String, String> {
    let DocumentMetadata {
        brand,
        model,
        extra,
    } = metadata;

    let mut map = BTreeMap::new();
    if let Some(brand) = canonical_brand(brand) {
        map.insert("brand".to_string(), brand);
    }
    if let Some(model) = canonical_model(model) {
        map.insert("model".to_string(), model);
    }
    for (key, value) in extra {
        let key = key.trim().to_lowercase();
        let value = value.trim().to_string();
        if key.is_empty() || value.is_empty() || key == "brand" || key == "model" {
            continue;
        }
        map.insert(key, value);
    }
    map
}
