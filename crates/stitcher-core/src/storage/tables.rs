//! Table layout and the encoding helpers shared by readers and writers.

use crate::error::{Result, StitchError};
use crate::keys::StitchKey;
use crate::types::{EntityId, StitchEdge};
use redb::{MultimapTableDefinition, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

// Primary records, bincode-encoded
pub(crate) const ENTITIES: TableDefinition<u64, &[u8]> = TableDefinition::new("entities");
pub(crate) const EDGES: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");
pub(crate) const PAYLOADS: TableDefinition<u64, &[u8]> = TableDefinition::new("payloads");
pub(crate) const DATASOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("datasources");
pub(crate) const STITCHES: TableDefinition<u64, &[u8]> = TableDefinition::new("stitches");

// Adjacency: entity id -> edge ids touching it
pub(crate) const EDGES_BY_ENTITY: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("edges_by_entity");
// Uniqueness of (endpoints, key, value)
pub(crate) const EDGE_TUPLES: TableDefinition<&str, u64> = TableDefinition::new("edge_tuples");

// Secondary indexes
pub(crate) const STITCH_INDEX: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("stitch_index");
pub(crate) const PROPERTY_INDEX: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("property_index");
pub(crate) const ENTITIES_BY_LABEL: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("entities_by_label");
pub(crate) const ENTITIES_BY_SOURCE: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("entities_by_source");
pub(crate) const STITCHES_BY_VERSION: MultimapTableDefinition<u32, u64> =
    MultimapTableDefinition::new("stitches_by_version");
pub(crate) const STITCH_PROPERTY_INDEX: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("stitch_property_index");
// External ids live apart from property values so a source column named
// `id` never answers an external-id lookup.
pub(crate) const EXTERNAL_ID_INDEX: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("external_id_index");
pub(crate) const STITCH_EXTERNAL_INDEX: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("stitch_external_index");

// Usage counts backing introspection
pub(crate) const LABEL_NAMES: TableDefinition<&str, u64> = TableDefinition::new("label_names");
pub(crate) const PROPERTY_NAMES: TableDefinition<&str, u64> = TableDefinition::new("property_names");
pub(crate) const RELATIONSHIP_NAMES: TableDefinition<&str, u64> =
    TableDefinition::new("relationship_names");

pub(crate) const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

pub const CURRENT_SCHEMA_VERSION: u32 = 2;
pub(crate) const SCHEMA_VERSION_KEY: &str = "schema_version";
pub(crate) const NEXT_ID_KEY: &str = "seq:next_id";
pub(crate) const NEXT_EDGE_ID_KEY: &str = "seq:next_edge_id";
pub(crate) const STITCH_VERSION_KEY: &str = "seq:stitch_version";
pub(crate) const COMPONENT_GENERATION_KEY: &str = "seq:component_generation";
pub(crate) const LAST_MODIFIED_KEY: &str = "last_modified";
pub(crate) const ENTITY_COUNT_KEY: &str = "stats:entity_count";
pub(crate) const EDGE_COUNT_KEY: &str = "stats:edge_count";

const SEP: char = '\u{1f}';

/// Which introspection table to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Label,
    Property,
    Relationship,
}

pub(crate) fn names_table(kind: NameKind) -> TableDefinition<'static, &'static str, u64> {
    match kind {
        NameKind::Label => LABEL_NAMES,
        NameKind::Property => PROPERTY_NAMES,
        NameKind::Relationship => RELATIONSHIP_NAMES,
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(StitchError::from)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(StitchError::from)
}

pub(crate) fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

pub(crate) fn stitch_index_key(key: StitchKey, value: &str) -> String {
    format!("{}{}{}", key.as_str(), SEP, value)
}

/// Bounds covering every value indexed under `key`.
pub(crate) fn stitch_index_range(key: StitchKey) -> (String, String) {
    (
        format!("{}{}", key.as_str(), SEP),
        format!("{}{}", key.as_str(), char::from_u32(SEP as u32 + 1).unwrap_or(' ')),
    )
}

/// Value part of a stitch index key.
pub(crate) fn stitch_index_value(index_key: &str) -> &str {
    index_key.split_once(SEP).map(|(_, v)| v).unwrap_or("")
}

pub(crate) fn property_index_key(name: &str, value: &str) -> String {
    format!("{}{}{}", name, SEP, value)
}

pub(crate) fn stitch_property_key(version: u32, name: &str, value: &str) -> String {
    format!("{}{}{}{}{}", version, SEP, name, SEP, value)
}

pub(crate) fn stitch_external_key(version: u32, external: &str) -> String {
    format!("{}{}{}", version, SEP, external)
}

/// Uniqueness key for an edge. Undirected keys use ordered endpoints so
/// (a, b) and (b, a) collide.
pub(crate) fn edge_tuple_key(a: EntityId, b: EntityId, key: StitchKey, value: &str) -> String {
    let (x, y) = if key.is_directed() || a < b { (a, b) } else { (b, a) };
    format!("{}{}{}{}{}{}{}", x, SEP, y, SEP, key.as_str(), SEP, value)
}

pub(crate) fn edge_tuple_key_of(edge: &StitchEdge) -> String {
    edge_tuple_key(edge.from, edge.to, edge.key, &edge.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_tuple_key_symmetry() {
        assert_eq!(
            edge_tuple_key(1, 2, StitchKey::Cas, "50-78-2"),
            edge_tuple_key(2, 1, StitchKey::Cas, "50-78-2")
        );
        assert_ne!(
            edge_tuple_key(1, 2, StitchKey::ActiveMoiety, "X"),
            edge_tuple_key(2, 1, StitchKey::ActiveMoiety, "X")
        );
    }

    #[test]
    fn test_stitch_index_range_bounds() {
        let (lo, hi) = stitch_index_range(StitchKey::Cas);
        let k = stitch_index_key(StitchKey::Cas, "50-78-2");
        assert!(lo.as_str() <= k.as_str() && k.as_str() < hi.as_str());
        let other = stitch_index_key(StitchKey::Cid, "1");
        assert!(!(lo.as_str() <= other.as_str() && other.as_str() < hi.as_str()));
        assert_eq!(stitch_index_value(&k), "50-78-2");
    }

    #[test]
    fn test_decode_u64() {
        assert_eq!(decode_u64(&42u64.to_le_bytes()), 42);
        assert_eq!(decode_u64(&[]), 0);
    }
}
