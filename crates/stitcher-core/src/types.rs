use crate::keys::StitchKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Internal numeric identifier. Entities and stitches draw from the same
/// monotonically increasing sequence; ids are never reused.
pub type EntityId = u64;

/// Identifier of a stitch edge.
pub type EdgeId = u64;

/// Label prefix carried by members of a colored or relabeled component.
pub const COMPONENT_LABEL_PREFIX: &str = "CC_";

/// Label carried by entities with no retained stitch edge after relabeling.
pub const SINGLETON_LABEL: &str = "SINGLETON";

/// Label carried by entities created for records that failed to parse. They
/// hold only the raw payload and take no part in components.
pub const MALFORMED_LABEL: &str = "MALFORMED";

/// Number of hex characters kept from a digest when it becomes a key.
pub const KEY_PREFIX_LEN: usize = 9;

/// SHA-256 hex digest of the given parts, fed in order.
pub fn sha256_hex<I, T>(parts: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    hex::encode(hasher.finalize())
}

/// Semantic type of an entity. Cross-cutting roles (data source, component
/// generation) are carried as labels instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A drug, probe or other agent; the active moiety of a substance.
    #[default]
    Agent,
    /// Disease or other medical condition.
    Condition,
    /// Molecular target or biological process acted on by an agent.
    TargetBiology,
    ClinicalTrial,
    Other,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Agent,
        EntityKind::Condition,
        EntityKind::TargetBiology,
        EntityKind::ClinicalTrial,
        EntityKind::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Agent => "Agent",
            EntityKind::Condition => "Condition",
            EntityKind::TargetBiology => "TargetBiology",
            EntityKind::ClinicalTrial => "ClinicalTrial",
            EntityKind::Other => "Other",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = crate::error::StitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s.chars().filter(|c| *c != '_').collect();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(&folded))
            .ok_or_else(|| crate::error::StitchError::Validation(format!("Unknown entity kind: {}", s)))
    }
}

/// A typed property value taken from a source record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropertyValue {
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    fn rank(&self) -> u8 {
        match self {
            PropertyValue::Integer(_) => 0,
            PropertyValue::Float(_) => 1,
            PropertyValue::Text(_) => 2,
            PropertyValue::List(_) => 3,
        }
    }

    /// Scalar values, with lists flattened.
    pub fn scalars(&self) -> Vec<&PropertyValue> {
        match self {
            PropertyValue::List(items) => items.iter().flat_map(|v| v.scalars()).collect(),
            other => vec![other],
        }
    }

    /// Rendering used for the value index and for literal comparisons.
    pub fn index_text(&self) -> String {
        match self {
            PropertyValue::Integer(v) => v.to_string(),
            PropertyValue::Float(v) => v.to_string(),
            PropertyValue::Text(v) => v.clone(),
            PropertyValue::List(items) => items
                .iter()
                .map(|v| v.index_text())
                .collect::<Vec<_>>()
                .join("|"),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::Integer(v) => serde_json::Value::from(*v),
            PropertyValue::Float(v) => serde_json::Value::from(*v),
            PropertyValue::Text(v) => serde_json::Value::from(v.as_str()),
            PropertyValue::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PropertyValue {}

impl PartialOrd for PropertyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PropertyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PropertyValue::Integer(a), PropertyValue::Integer(b)) => a.cmp(b),
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.total_cmp(b),
            (PropertyValue::Text(a), PropertyValue::Text(b)) => a.cmp(b),
            (PropertyValue::List(a), PropertyValue::List(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.index_text())
    }
}

/// Inferred field type, ordered by width. Widening only ever moves right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldType {
    Integer,
    Float,
    Text,
}

impl FieldType {
    pub fn widen(self, other: FieldType) -> FieldType {
        self.max(other)
    }
}

/// Stitch-key values grouped by key.
pub type KeyValues = BTreeMap<StitchKey, BTreeSet<String>>;

/// One ingested record as a graph node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: EntityId,

    pub kind: EntityKind,

    /// Key of the owning data source. Also present in `labels`.
    pub source: String,

    /// Capability tags: data source key, kind name, component labels.
    pub labels: BTreeSet<String>,

    /// Fields from the source record, typed by the scan pass.
    pub properties: BTreeMap<String, PropertyValue>,

    /// Normalized values this entity is indexed and matched under.
    pub stitches: KeyValues,

    /// Values withdrawn from matching by key deprecation.
    pub deprecated: KeyValues,

    /// Value of the source's external id field, if one was configured.
    pub external_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// True when every given label is present.
    pub fn has_labels<S: AsRef<str>>(&self, labels: &[S]) -> bool {
        labels.iter().all(|l| self.labels.contains(l.as_ref()))
    }

    /// The `CC_*` label, if the entity has been colored.
    pub fn component_label(&self) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.starts_with(COMPONENT_LABEL_PREFIX))
            .map(|l| l.as_str())
    }

    pub fn stitch_values(&self, key: StitchKey) -> impl Iterator<Item = &String> {
        self.stitches.get(&key).into_iter().flatten()
    }

    /// Property names as shown to callers, including `<KEY>.deprecated`
    /// annotations.
    pub fn property_view(&self) -> BTreeMap<String, PropertyValue> {
        let mut view = self.properties.clone();
        for (key, values) in &self.stitches {
            view.insert(
                key.as_str().to_string(),
                PropertyValue::List(values.iter().cloned().map(PropertyValue::Text).collect()),
            );
        }
        for (key, values) in &self.deprecated {
            view.insert(
                format!("{}.deprecated", key.as_str()),
                PropertyValue::List(values.iter().cloned().map(PropertyValue::Text).collect()),
            );
        }
        view
    }
}

/// Input for creating an entity. The store assigns the id and timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewEntity {
    pub kind: EntityKind,
    pub labels: BTreeSet<String>,
    pub properties: BTreeMap<String, PropertyValue>,
    pub stitches: KeyValues,
    pub external_id: Option<String>,
}

impl NewEntity {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Add a raw stitch value. It is normalized under `key`; values that
    /// normalize to nothing are dropped.
    pub fn with_stitch(mut self, key: StitchKey, raw: &str) -> Self {
        if let Some(value) = key.normalize(raw) {
            self.stitches.entry(key).or_default().insert(value);
        }
        self
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }
}

/// A relationship recording that two entities share a normalized key value.
/// Stored directed from the earlier entity to the later one; the meaning is
/// symmetric except for directed keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StitchEdge {
    pub id: EdgeId,
    pub from: EntityId,
    pub to: EntityId,
    pub key: StitchKey,
    pub value: String,
    /// Data source whose ingestion created the edge.
    pub source: String,
}

impl StitchEdge {
    /// The endpoint opposite `id`.
    pub fn other(&self, id: EntityId) -> EntityId {
        if self.from == id {
            self.to
        } else {
            self.from
        }
    }
}

/// The raw record an entity was created from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    pub entity: EntityId,
    pub source: String,
    /// Zero-based position of the record within its source.
    pub ordinal: u64,
    pub raw: String,
}

/// Field summary persisted with a data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub field_type: FieldType,
    pub count: u64,
}

/// Identity and policy of one ingested batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSource {
    /// Content digest prefix; also the label carried by owned entities.
    pub key: String,
    pub name: String,
    pub uri: Option<String>,
    /// Full SHA-256 of the ingested bytes.
    pub sha256: String,
    pub size: u64,
    pub instances: u64,
    pub created_at: DateTime<Utc>,
    pub id_field: Option<String>,
    pub name_field: Option<String>,
    /// Declared stitch fields and the keys they feed.
    pub stitches: BTreeMap<String, Vec<StitchKey>>,
    /// Fields found by the scan pass.
    pub fields: Vec<FieldInfo>,
}

impl DataSource {
    /// Key for a source identified by name rather than content.
    pub fn source_key(name: &str) -> String {
        Self::key_for_digest(&sha256_hex([name]))
    }

    pub fn key_for_digest(digest: &str) -> String {
        digest.chars().take(KEY_PREFIX_LEN).collect()
    }
}

/// Versioned summary of one component as of a synthesis pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stitch {
    pub id: EntityId,
    /// Digest prefix over the sorted member ids.
    pub hash: String,
    pub version: u32,
    /// Declared rank, the member count.
    pub rank: u64,
    /// Component root: the lowest member id.
    pub parent: EntityId,
    pub members: Vec<EntityId>,
    pub sources: BTreeSet<String>,
    /// External ids of the members, kept apart from column values.
    pub external_ids: BTreeSet<String>,
    /// Member properties merged by set union.
    pub properties: BTreeMap<String, BTreeSet<PropertyValue>>,
    pub created_at: DateTime<Utc>,
}

impl Stitch {
    pub fn version_label(version: u32) -> String {
        format!("V{}", version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_value_ordering() {
        let mut set = BTreeSet::new();
        set.insert(PropertyValue::Text("b".into()));
        set.insert(PropertyValue::Integer(2));
        set.insert(PropertyValue::Text("b".into()));
        set.insert(PropertyValue::Float(1.5));
        set.insert(PropertyValue::Integer(2));
        assert_eq!(set.len(), 3);
        assert_eq!(set.iter().next(), Some(&PropertyValue::Integer(2)));
        assert_eq!(PropertyValue::Float(f64::NAN), PropertyValue::Float(f64::NAN));
    }

    #[test]
    fn test_list_scalars_and_text() {
        let value = PropertyValue::List(vec![
            PropertyValue::Text("a".into()),
            PropertyValue::List(vec![PropertyValue::Integer(7)]),
        ]);
        assert_eq!(value.scalars().len(), 2);
        assert_eq!(value.index_text(), "a|7");
    }

    #[test]
    fn test_source_key_is_digest_prefix() {
        let key = DataSource::source_key("registry");
        assert_eq!(key.len(), KEY_PREFIX_LEN);
        assert!(sha256_hex(["registry"]).starts_with(&key));
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("target_biology".parse::<EntityKind>().unwrap(), EntityKind::TargetBiology);
        assert_eq!("agent".parse::<EntityKind>().unwrap(), EntityKind::Agent);
        assert!("widget".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_new_entity_normalizes_stitches() {
        let new = NewEntity::new(EntityKind::Agent)
            .with_stitch(StitchKey::Cas, " 50-78-2 ")
            .with_stitch(StitchKey::Cas, "50-78-2")
            .with_stitch(StitchKey::Cid, "not a number");
        assert_eq!(new.stitches.len(), 1);
        assert_eq!(new.stitches[&StitchKey::Cas].len(), 1);
    }
}
