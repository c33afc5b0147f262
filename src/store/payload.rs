//! Helpers for constructing Qdrant payloads and point identifiers.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

use super::types::ChunkRecord;

/// Build the payload object stored alongside each indexed chunk.
///
/// Scalar record fields live at the top level; the free-form metadata map is
/// flattened under `meta_` prefixed keys so exact-match filters can target
/// individual tags without colliding with the reserved fields.
pub(crate) fn build_payload(
    record: &ChunkRecord,
    timestamp_rfc3339: &str,
    embedder_fingerprint: &str,
) -> Value {
    let mut payload = Map::new();
    payload.insert("chunk_id".into(), Value::String(record.chunk_id.clone()));
    payload.insert(
        "document_id".into(),
        Value::String(record.document_id.clone()),
    );
    payload.insert("text".into(), Value::String(record.text.clone()));
    payload.insert("start_offset".into(), Value::from(record.start_offset));
    payload.insert("end_offset".into(), Value::from(record.end_offset));
    payload.insert("sequence_index".into(), Value::from(record.sequence_index));
    payload.insert("page_estimate".into(), Value::from(record.page_estimate));
    payload.insert(
        "ingested_at".into(),
        Value::String(timestamp_rfc3339.to_string()),
    );
    payload.insert(
        "embedder".into(),
        Value::String(embedder_fingerprint.to_string()),
    );

    for (key, value) in &record.metadata {
        payload.insert(format!("meta_{key}"), Value::String(value.clone()));
    }

    Value::Object(payload)
}

/// Read a flattened payload back into a chunk metadata map.
pub(crate) fn metadata_from_payload(payload: &Map<String, Value>) -> BTreeMap<String, String> {
    payload
        .iter()
        .filter_map(|(key, value)| {
            let stripped = key.strip_prefix("meta_")?;
            value
                .as_str()
                .map(|text| (stripped.to_string(), text.to_string()))
        })
        .collect()
}

/// Derive the deterministic Qdrant point id for a chunk.
///
/// Qdrant only accepts UUIDs or integers as point ids, so the chunk id is
/// hashed into a UUID. Determinism is what makes upsert a full replace.
pub(crate) fn point_id_for_chunk(chunk_id: &str) -> String {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0_u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ChunkRecord {
        ChunkRecord {
            chunk_id: "manual-7:0003".to_string(),
            document_id: "manual-7".to_string(),
            text: "Check the evaporator coil for icing.".to_string(),
            start_offset: 1950,
            end_offset: 2750,
            sequence_index: 3,
            page_estimate: 2,
            embedding: vec![0.0; 4],
            metadata: BTreeMap::from([
                ("brand".to_string(), "Carrier".to_string()),
                ("model".to_string(), "69NT40".to_string()),
            ]),
        }
    }

    #[test]
    fn point_id_is_stable_and_uuid_shaped() {
        let a = point_id_for_chunk("manual-7:0003");
        let b = point_id_for_chunk("manual-7:0003");
        let other = point_id_for_chunk("manual-7:0004");
        assert_eq!(a, b);
        assert_ne!(a, other);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn payload_carries_record_fields_and_flattened_metadata() {
        let record = sample_record();
        let payload = build_payload(&record, "2025-01-01T00:00:00Z", "hash/test/4");
        assert_eq!(payload["chunk_id"], "manual-7:0003");
        assert_eq!(payload["document_id"], "manual-7");
        assert_eq!(payload["page_estimate"], 2);
        assert_eq!(payload["meta_brand"], "Carrier");
        assert_eq!(payload["meta_model"], "69NT40");
        assert_eq!(payload["embedder"], "hash/test/4");
    }

    #[test]
    fn metadata_round_trips_through_payload() {
        let record = sample_record();
        let payload = build_payload(&record, "2025-01-01T00:00:00Z", "hash/test/4");
        let map = payload.as_object().expect("object payload");
        let metadata = metadata_from_payload(map);
        assert_eq!(metadata, record.metadata);
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }
}
