//! Triplet records extracted from completion replies

use crate::Provenance;
use serde::{Deserialize, Serialize};

/// A labelled, typed node or edge of a triplet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Surface label as it appears in the source
    pub label: String,

    /// Schema type
    #[serde(rename = "type")]
    pub kind: String,
}

impl Entity {
    /// Create a new entity
    pub fn new(label: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: kind.into(),
        }
    }
}

/// A head–relationship–tail extraction
///
/// Records leave the parser without provenance; the extraction pipeline
/// attaches it before a record is counted or written. Serialized records
/// carry `_chunk_index` and `_source_text` only when provenance is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TripletRecord {
    /// Head entity
    pub head: Entity,

    /// Relationship between head and tail
    pub relationship: Entity,

    /// Tail entity
    pub tail: Entity,

    /// Originating chunk, if attached
    #[serde(flatten)]
    pub provenance: Option<Provenance>,
}

impl TripletRecord {
    /// Create a record without provenance
    pub fn new(head: Entity, relationship: Entity, tail: Entity) -> Self {
        Self {
            head,
            relationship,
            tail,
            provenance: None,
        }
    }

    /// Attach provenance
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Chunk;

    fn record() -> TripletRecord {
        TripletRecord::new(
            Entity::new("Alice", "Person"),
            Entity::new("works at", "EmployedBy"),
            Entity::new("Acme", "Company"),
        )
    }

    #[test]
    fn test_serialize_without_provenance() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["head"]["label"], "Alice");
        assert_eq!(json["head"]["type"], "Person");
        assert_eq!(json["relationship"]["type"], "EmployedBy");
        assert!(json.get("_chunk_index").is_none());
        assert!(json.get("_source_text").is_none());
    }

    #[test]
    fn test_serialize_with_provenance_flattens() {
        let chunks = vec![Chunk::new(0, "Alice works at Acme.".to_string(), 0, 20)];
        let enriched = record().with_provenance(Provenance::resolve(0, &chunks));

        let json = serde_json::to_value(&enriched).unwrap();
        assert_eq!(json["_chunk_index"], 0);
        assert_eq!(json["_source_text"], "Alice works at Acme.");
        assert_eq!(json["tail"]["label"], "Acme");
    }
}
